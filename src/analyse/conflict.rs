//! Case-insensitive collision checks over the contributed target set.

use std::collections::BTreeMap;

use crate::error::AnalysisError;

use super::TaskFunction;

/// Reject duplicate target names and alias collisions.
///
/// Target names compare case-insensitively; a collision lists every
/// contributing declaration site. Alias keys must collide neither with each
/// other nor with any computed target name.
///
/// # Errors
///
/// Returns the first collision found, in deterministic order.
pub fn check(
    functions: &[TaskFunction],
    aliases: &BTreeMap<String, String>,
) -> Result<(), AnalysisError> {
    let mut by_target: BTreeMap<String, Vec<&TaskFunction>> = BTreeMap::new();
    for function in functions {
        by_target
            .entry(function.target_name().to_lowercase())
            .or_default()
            .push(function);
    }
    for (target, declarations) in &by_target {
        if declarations.len() > 1 {
            return Err(AnalysisError::DuplicateTarget {
                target: target.clone(),
                sources: declarations
                    .iter()
                    .map(|f| f.source_label())
                    .collect(),
            });
        }
    }

    let mut seen_aliases: BTreeMap<String, &str> = BTreeMap::new();
    for alias in aliases.keys() {
        let lower = alias.to_lowercase();
        if by_target.contains_key(&lower) {
            return Err(AnalysisError::AliasCollision {
                alias: alias.clone(),
                existing: format!("target {lower:?}"),
            });
        }
        if seen_aliases.insert(lower, alias).is_some() {
            return Err(AnalysisError::AliasCollision {
                alias: alias.clone(),
                existing: "another alias declaration".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn function(name: &str, receiver: &str, file: &str) -> TaskFunction {
        TaskFunction {
            name: name.to_string(),
            receiver: receiver.to_string(),
            package_alias: String::new(),
            import_path: String::new(),
            takes_context: false,
            returns_error: false,
            arguments: Vec::new(),
            is_default: false,
            documentation: String::new(),
            file: PathBuf::from(file),
        }
    }

    #[test]
    fn distinct_targets_pass() {
        let functions = vec![function("Build", "", "a.rs"), function("Deploy", "", "a.rs")];
        assert!(check(&functions, &BTreeMap::new()).is_ok());
    }

    #[test]
    fn case_insensitive_duplicate_rejected_with_both_sources() {
        let functions = vec![
            function("Build", "", "a.rs"),
            function("build", "", "b.rs"),
        ];
        let err = check(&functions, &BTreeMap::new()).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("duplicate target"));
        assert!(text.contains("a.rs"));
        assert!(text.contains("b.rs"));
    }

    #[test]
    fn receiver_disambiguates() {
        let functions = vec![
            function("Migrate", "Db", "a.rs"),
            function("Migrate", "", "a.rs"),
        ];
        assert!(check(&functions, &BTreeMap::new()).is_ok());
    }

    #[test]
    fn alias_colliding_with_target_rejected() {
        let functions = vec![function("Build", "", "a.rs")];
        let mut aliases = BTreeMap::new();
        aliases.insert("BUILD".to_string(), "build".to_string());
        let err = check(&functions, &aliases).unwrap_err();
        assert!(err.to_string().contains("collides with target"));
    }

    #[test]
    fn case_colliding_aliases_rejected() {
        let mut aliases = BTreeMap::new();
        aliases.insert("B".to_string(), "build".to_string());
        aliases.insert("b".to_string(), "deploy".to_string());
        let err = check(&[], &aliases).unwrap_err();
        assert!(err.to_string().contains("alias"));
    }

    #[test]
    fn unique_aliases_pass() {
        let functions = vec![function("Build", "", "a.rs")];
        let mut aliases = BTreeMap::new();
        aliases.insert("b".to_string(), "build".to_string());
        assert!(check(&functions, &aliases).is_ok());
    }
}
