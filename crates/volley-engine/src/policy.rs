//! Tool governance: visibility filtering, approval classification, and
//! argument validation including workspace-boundary enforcement.
//!
//! The policy is stateless; everything it needs arrives in the
//! [`PolicyContext`].

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use volley_contract::{
    is_system_tool, ApprovalMode, Args, EngineError, PolicyContext, RiskLevel,
};

use crate::registry::{str_arg, Tool};

/// Tools whose purpose is writing or executing; they always need approval
/// under `auto`.
const WRITE_ORIENTED_TOOLS: &[&str] = &[
    "write_file",
    "edit_file",
    "delete_file",
    "shell",
    "run_command",
    "run_skill_script",
];

/// Shell-like tools whose `command` argument is scanned against the deny
/// list.
const SHELL_TOOLS: &[&str] = &["shell", "run_command"];

/// System tools that mutate plan or memory state.
const PLAN_MEMORY_MUTATORS: &[&str] = &["write_todos", "update_memory"];

/// The standard policy rules.
pub struct DefaultPolicy {
    /// Command substrings that force approval even in `auto` mode.
    dangerous_commands: Vec<&'static str>,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultPolicy {
    pub fn new() -> Self {
        Self {
            dangerous_commands: vec![
                "rm ",
                "rm\t",
                "rmdir",
                "sudo ",
                "chmod ",
                "chown ",
                "mv ",
                "cp -r",
                "> ",
                ">>",
                "curl ",
                "wget ",
                "git push",
                "git reset --hard",
            ],
        }
    }

    /// The subset of tools visible to the model. No skill restriction means
    /// every tool is visible; otherwise the skill allowlist plus the fixed
    /// system allowlist.
    pub fn filter(&self, pctx: &PolicyContext, tools: Vec<Arc<dyn Tool>>) -> Vec<Arc<dyn Tool>> {
        if pctx.allowed_tools.is_empty() {
            return tools;
        }
        tools
            .into_iter()
            .filter(|t| {
                pctx.allowed_tools.iter().any(|n| n == t.name()) || is_system_tool(t.name())
            })
            .collect()
    }

    /// Whether this call must pause for a human decision.
    pub fn need_approval(&self, pctx: &PolicyContext, tool: &dyn Tool, args: &Args) -> bool {
        match pctx.approval_mode {
            ApprovalMode::Suggest => true,
            ApprovalMode::FullAuto => false,
            ApprovalMode::Auto => self.need_approval_auto(tool, args),
        }
    }

    fn need_approval_auto(&self, tool: &dyn Tool, args: &Args) -> bool {
        let name = tool.name();

        if PLAN_MEMORY_MUTATORS.contains(&name) {
            return true;
        }

        if tool.risk() == RiskLevel::High {
            return true;
        }

        if SHELL_TOOLS.contains(&name) {
            if let Some(command) = str_arg(args, "command") {
                if self
                    .dangerous_commands
                    .iter()
                    .any(|pattern| command.contains(pattern))
                {
                    return true;
                }
            }
        }

        WRITE_ORIENTED_TOOLS.contains(&name)
    }

    /// Reject calls outside the skill allowlist and path arguments outside
    /// the workspace. Runs on first dispatch and again on resumption, so
    /// modified arguments re-validate.
    pub fn validate(
        &self,
        pctx: &PolicyContext,
        tool: &dyn Tool,
        args: &Args,
    ) -> Result<(), EngineError> {
        let name = tool.name();

        if !pctx.allowed_tools.is_empty()
            && !is_system_tool(name)
            && !pctx.allowed_tools.iter().any(|n| n == name)
        {
            return Err(EngineError::PolicyDenied(format!(
                "tool {name:?} not in skill allowed-tools"
            )));
        }

        if let Some(path) = str_arg(args, "path") {
            if pctx.workspace_root.as_os_str().is_empty() {
                return Ok(());
            }
            validate_workspace_path(path, &pctx.workspace_root)?;
        }

        Ok(())
    }
}

/// Check that `target` stays inside `workspace_root`, resolving symlinks via
/// the nearest existing ancestor. The root itself is allowed.
pub fn validate_workspace_path(target: &str, workspace_root: &Path) -> Result<(), EngineError> {
    let joined = if Path::new(target).is_absolute() {
        PathBuf::from(target)
    } else {
        workspace_root.join(target)
    };

    let resolved = resolve_lenient(&lexical_clean(&joined));
    let root = resolve_lenient(&lexical_clean(workspace_root));

    if resolved == root || resolved.starts_with(&root) {
        Ok(())
    } else {
        Err(EngineError::WorkspaceEscape(target.to_string()))
    }
}

/// Remove `.` components and resolve `..` textually. `..` above an absolute
/// root is dropped, matching lexical path cleaning elsewhere.
fn lexical_clean(path: &Path) -> PathBuf {
    let absolute = path.is_absolute();
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) && out.pop();
                if !popped && !absolute {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the nearest existing ancestor, then re-append the
/// not-yet-existing remainder. Resolves symlinks without requiring the
/// target to exist.
fn resolve_lenient(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match current.canonicalize() {
            Ok(mut resolved) => {
                for part in tail.iter().rev() {
                    resolved.push(part);
                }
                return resolved;
            }
            Err(_) => match (current.parent(), current.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    current = parent.to_path_buf();
                }
                _ => {
                    let mut out = current;
                    for part in tail.iter().rev() {
                        out.push(part);
                    }
                    return out;
                }
            },
        }
    }
}
