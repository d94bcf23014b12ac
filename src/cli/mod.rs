//! CLI subcommands: validate, bindings, render, status, bind-account.

use crate::core::binder::CloudFormationBinder;
use crate::core::types::{BindingAction, OrgResourceType, TemplateRoot};
use crate::core::{hasher, parser, state, PersistedState};
use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate an organization template without touching state
    Validate {
        /// Path to the organization template
        #[arg(short, long, default_value = "organization.yml")]
        file: PathBuf,
    },

    /// List deployment targets and what would change
    Bindings {
        /// Path to the organization template
        #[arg(short, long, default_value = "organization.yml")]
        file: PathBuf,

        /// State file
        #[arg(long, default_value = "state.yaml")]
        state: PathBuf,

        /// Stack name (default: template file stem)
        #[arg(long)]
        stack: Option<String>,
    },

    /// Render one template per target into a directory
    Render {
        /// Path to the organization template
        #[arg(short, long, default_value = "organization.yml")]
        file: PathBuf,

        /// State file
        #[arg(long, default_value = "state.yaml")]
        state: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "out")]
        out: PathBuf,

        /// Stack name (default: template file stem)
        #[arg(long)]
        stack: Option<String>,

        /// Record rendered hashes in the state file
        #[arg(long)]
        commit: bool,
    },

    /// Show persisted bindings and deployed targets
    Status {
        /// State file
        #[arg(long, default_value = "state.yaml")]
        state: PathBuf,
    },

    /// Record the physical id of a logical account
    BindAccount {
        /// State file
        #[arg(long, default_value = "state.yaml")]
        state: PathBuf,

        /// Logical account id from the template
        #[arg(long)]
        logical_id: String,

        /// Physical account id
        #[arg(long)]
        physical_id: String,

        /// Master account id, required when the state file does not exist yet
        #[arg(long)]
        master: Option<String>,
    },

    /// Forget the physical id of a logical account
    UnbindAccount {
        /// State file
        #[arg(long, default_value = "state.yaml")]
        state: PathBuf,

        /// Logical account id from the template
        #[arg(long)]
        logical_id: String,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Bindings { file, state, stack } => {
            cmd_bindings(&file, &state, stack.as_deref())
        }
        Commands::Render {
            file,
            state,
            out,
            stack,
            commit,
        } => cmd_render(&file, &state, &out, stack.as_deref(), commit),
        Commands::Status { state } => cmd_status(&state),
        Commands::BindAccount {
            state,
            logical_id,
            physical_id,
            master,
        } => cmd_bind_account(&state, &logical_id, &physical_id, master.as_deref()),
        Commands::UnbindAccount { state, logical_id } => cmd_unbind_account(&state, &logical_id),
    }
}

fn cmd_validate(file: &Path) -> Result<()> {
    let template = parser::parse_template_file(file)?;
    let errors = parser::validate_template(&template);

    if errors.is_empty() {
        println!(
            "OK: {} ({} accounts, {} parameters, {} resources)",
            file.display(),
            template.organization.all_accounts().count(),
            template.parameters.len(),
            template.resources.len()
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        bail!("{} validation error(s)", errors.len())
    }
}

/// Parse and validate a template file, printing every validation error.
fn load_template(file: &Path) -> Result<TemplateRoot> {
    let template = parser::parse_template_file(file)?;
    let errors = parser::validate_template(&template);
    if errors.is_empty() {
        return Ok(template);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    bail!("validation failed")
}

/// Load the state file, or start an empty one rooted at the template's master account.
fn load_or_create_state(template: &TemplateRoot, path: &Path) -> Result<PersistedState> {
    if let Some(existing) = state::load_state(path)? {
        return Ok(existing);
    }
    let master = template
        .organization
        .master_account
        .account_id
        .as_deref()
        .ok_or_else(|| anyhow!("master account has no AccountId"))?;
    info!(path = %path.display(), "no state file, starting empty");
    Ok(PersistedState::create_empty(master))
}

fn stack_name_for(file: &Path, stack: Option<&str>) -> String {
    match stack {
        Some(s) => s.to_string(),
        None => file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "organization".to_string()),
    }
}

fn cmd_bindings(file: &Path, state_path: &Path, stack: Option<&str>) -> Result<()> {
    let template = load_template(file)?;
    let state = load_or_create_state(&template, state_path)?;
    let stack_name = stack_name_for(file, stack);

    let binder = CloudFormationBinder::new(&stack_name, &template, &state);
    let bindings = binder.enum_bindings()?;

    println!("Bindings: {} ({} targets)", binder.stack_name(), bindings.len());
    println!();

    let mut changed = 0;
    let mut failed = 0;
    for binding in &bindings {
        let symbol = match binding.action() {
            Ok(BindingAction::UpdateOrCreate) => {
                changed += 1;
                "~".to_string()
            }
            Ok(_) => " ".to_string(),
            Err(e) => {
                failed += 1;
                format!("! ({})", e)
            }
        };
        println!(
            "  {} {}/{}: {}",
            symbol,
            binding.account_id,
            binding.region,
            binding.template.resources().join(", ")
        );
    }

    let removed = binder.enum_removed_targets(&bindings);
    for target in &removed {
        println!("  - {}/{}: {}", target.account_id, target.region, BindingAction::Delete);
    }

    println!();
    println!(
        "Bindings: {} to update, {} to delete, {} unchanged, {} unresolved.",
        changed,
        removed.len(),
        bindings.len() - changed - failed,
        failed
    );
    if failed > 0 {
        bail!("{} target(s) failed to resolve", failed);
    }
    Ok(())
}

/// Output path of a rendered target.
fn rendered_path(out: &Path, stack_name: &str, account_id: &str, region: &str) -> PathBuf {
    out.join(format!("{}-{}-{}.json", stack_name, account_id, region))
}

fn cmd_render(
    file: &Path,
    state_path: &Path,
    out: &Path,
    stack: Option<&str>,
    commit: bool,
) -> Result<()> {
    let template = load_template(file)?;
    let mut state = load_or_create_state(&template, state_path)?;
    let stack_name = stack_name_for(file, stack);

    std::fs::create_dir_all(out).with_context(|| format!("cannot create {}", out.display()))?;

    let (rendered, removed) = {
        let binder = CloudFormationBinder::new(&stack_name, &template, &state);
        let bindings = binder.enum_bindings()?;
        let mut rendered = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            let body = binding.template.create_template_body().with_context(|| {
                format!("cannot render {}/{}", binding.account_id, binding.region)
            })?;
            let path = rendered_path(out, &stack_name, &binding.account_id, &binding.region);
            std::fs::write(&path, body)
                .with_context(|| format!("cannot write {}", path.display()))?;
            println!("  Wrote {}", path.display());
            rendered.push(binding.to_stack_target()?);
        }
        (rendered, binder.enum_removed_targets(&bindings))
    };

    println!(
        "Rendered {} target(s) for {} ({} removed).",
        rendered.len(),
        stack_name,
        removed.len()
    );

    if commit {
        for target in removed {
            state.remove_target(&target.stack_name, &target.account_id, &target.region);
        }
        for target in rendered {
            state.set_target(target);
        }
        state::save_state(state_path, &state)?;
        println!("Committed state to {}", state_path.display());
    }
    Ok(())
}

fn cmd_status(state_path: &Path) -> Result<()> {
    let state = state::load_state(state_path)?
        .ok_or_else(|| anyhow!("no state file at {}", state_path.display()))?;

    println!("Master account: {}", state.master_account_id());
    println!();
    println!("Bindings:");
    for binding in state.all_bindings() {
        println!(
            "  {:30} {:28} {}",
            binding.logical_id, binding.binding_type, binding.physical_id
        );
    }
    println!();
    println!("Targets:");
    for target in state.all_targets() {
        println!(
            "  {:20} {:14} {:16} {}",
            target.stack_name, target.account_id, target.region, target.last_committed_hash
        );
    }
    Ok(())
}

fn cmd_bind_account(
    state_path: &Path,
    logical_id: &str,
    physical_id: &str,
    master: Option<&str>,
) -> Result<()> {
    if !crate::core::resolver::is_physical_account_id(physical_id) {
        bail!("'{}' is not a 12-digit account id", physical_id);
    }
    let mut state = match state::load_state(state_path)? {
        Some(s) => s,
        None => {
            let master = master.ok_or_else(|| {
                anyhow!(
                    "{} does not exist; pass --master to create it",
                    state_path.display()
                )
            })?;
            PersistedState::create_empty(master)
        }
    };

    let hash = hasher::composite_hash(&[logical_id, physical_id]);
    state.set_account_binding(logical_id, physical_id, &hash);
    state::save_state(state_path, &state)?;
    println!("Bound {} → {}", logical_id, physical_id);
    Ok(())
}

fn cmd_unbind_account(state_path: &Path, logical_id: &str) -> Result<()> {
    let mut state = state::load_state(state_path)?
        .ok_or_else(|| anyhow!("no state file at {}", state_path.display()))?;
    let removed = state
        .remove_binding(OrgResourceType::Account, logical_id)
        .ok_or_else(|| anyhow!("account '{}' is not bound", logical_id))?;
    state::save_state(state_path, &state)?;
    println!("Unbound {} (was {})", logical_id, removed.physical_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"
AWSTemplateFormatVersion: '2010-09-09-OC'
Organization:
  MasterAccount:
    Type: OC::ORG::MasterAccount
    Properties:
      AccountId: '000000000000'
  Account1:
    Type: OC::ORG::Account
  Account2:
    Type: OC::ORG::Account
DefaultOrganizationBinding:
  Accounts: [!Ref Account1, !Ref Account2]
  Regions: eu-west-1
Resources:
  Topic:
    Type: AWS::SNS::Topic
"#;

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("shared.yml");
        std::fs::write(&file, TEMPLATE).unwrap();
        let state = dir.path().join("state.yaml");
        cmd_bind_account(&state, "Account1", "111111111111", Some("000000000000")).unwrap();
        cmd_bind_account(&state, "Account2", "222222222222", None).unwrap();
        (dir, file, state)
    }

    #[test]
    fn test_validate_valid() {
        let (_dir, file, _) = setup();
        cmd_validate(&file).unwrap();
    }

    #[test]
    fn test_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.yml");
        std::fs::write(
            &file,
            r#"
Organization:
  MasterAccount:
    Type: OC::ORG::MasterAccount
Resources:
  Topic:
    Type: AWS::SNS::Topic
"#,
        )
        .unwrap();
        assert!(cmd_validate(&file).is_err());
    }

    #[test]
    fn test_bind_account_requires_master_for_new_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.yaml");
        assert!(cmd_bind_account(&state, "Account1", "111111111111", None).is_err());
        assert!(cmd_bind_account(&state, "Account1", "not-an-id", Some("000000000000")).is_err());
        assert!(!state.exists());
    }

    #[test]
    fn test_bind_account_persists() {
        let (_dir, _, state) = setup();
        let loaded = state::load_state(&state).unwrap().unwrap();
        assert_eq!(loaded.master_account_id(), "000000000000");
        assert_eq!(
            loaded
                .get_binding(OrgResourceType::Account, "Account2")
                .unwrap()
                .physical_id,
            "222222222222"
        );
    }

    #[test]
    fn test_bindings() {
        let (_dir, file, state) = setup();
        cmd_bindings(&file, &state, None).unwrap();
    }

    #[test]
    fn test_bindings_unbound_account_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("shared.yml");
        std::fs::write(&file, TEMPLATE).unwrap();
        let err = cmd_bindings(&file, &dir.path().join("state.yaml"), None).unwrap_err();
        assert!(err.to_string().contains("UnknownAccount"));
    }

    #[test]
    fn test_render_and_commit() {
        let (dir, file, state) = setup();
        let out = dir.path().join("out");
        cmd_render(&file, &state, &out, None, true).unwrap();

        let rendered = rendered_path(&out, "shared", "111111111111", "eu-west-1");
        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&rendered).unwrap()).unwrap();
        assert_eq!(body["Resources"]["Topic"]["Type"], "AWS::SNS::Topic");
        assert!(rendered_path(&out, "shared", "222222222222", "eu-west-1").exists());

        let loaded = state::load_state(&state).unwrap().unwrap();
        assert_eq!(loaded.enum_targets("shared").len(), 2);

        // Second render against the committed state changes nothing.
        cmd_render(&file, &state, &out, Some("shared"), false).unwrap();
        cmd_bindings(&file, &state, None).unwrap();
        cmd_status(&state).unwrap();
    }

    #[test]
    fn test_render_commit_drops_removed_targets() {
        let (dir, file, state) = setup();
        let out = dir.path().join("out");
        cmd_render(&file, &state, &out, None, true).unwrap();

        std::fs::write(&file, TEMPLATE.replace("[!Ref Account1, !Ref Account2]", "!Ref Account1"))
            .unwrap();
        cmd_render(&file, &state, &out, None, true).unwrap();

        let loaded = state::load_state(&state).unwrap().unwrap();
        let targets = loaded.enum_targets("shared");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].account_id, "111111111111");
    }

    #[test]
    fn test_unbind_account() {
        let (_dir, file, state) = setup();
        cmd_unbind_account(&state, "Account2").unwrap();
        let loaded = state::load_state(&state).unwrap().unwrap();
        assert!(loaded
            .get_binding(OrgResourceType::Account, "Account2")
            .is_none());
        assert!(cmd_unbind_account(&state, "Account2").is_err());

        let err = cmd_bindings(&file, &state, None).unwrap_err();
        assert!(err.to_string().contains("Account2"));
    }

    #[test]
    fn test_load_template_rejects_unknown_section() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("typo.yml");
        std::fs::write(&file, TEMPLATE.replace("Resources:", "Resource:")).unwrap();
        let err = load_template(&file).unwrap_err();
        assert!(err.to_string().contains("unknown top-level section 'Resource'"));
        assert!(cmd_validate(&file).is_err());
    }

    #[test]
    fn test_status_missing_state() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_status(&dir.path().join("none.yaml")).is_err());
    }

    #[test]
    fn test_stack_name_for() {
        assert_eq!(stack_name_for(Path::new("/x/org.yml"), None), "org");
        assert_eq!(stack_name_for(Path::new("/x/org.yml"), Some("s")), "s");
    }

    #[test]
    fn test_dispatch_validate() {
        let (_dir, file, _) = setup();
        dispatch(Commands::Validate { file }).unwrap();
    }
}
