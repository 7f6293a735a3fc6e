//! Declarative suite files
//!
//! A suite file (YAML or JSON) declares a tree of tests. Tests with a `run`
//! command get a [`CommandBody`]; tests with nested `tests` form deeper scopes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{CommandBody, DeclaredTest, DiscoveredFile, Discovery, DiscoveryError, TestBody};
use crate::models::Scope;

/// Default suffixes of suite files
pub const DEFAULT_SUFFIXES: &[&str] = &[".test.yaml", ".test.yml", ".test.json"];

/// Top level of a suite file
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SuiteFile {
    #[serde(default)]
    pub tests: Vec<SuiteTest>,
}

/// Skip directive: `skip: true` or `skip: "reason"`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum SkipDirective {
    Flag(bool),
    Reason(String),
}

/// One test declaration
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SuiteTest {
    pub name: String,

    /// Command line to run, split with shell quoting rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    /// Exit code that counts as a pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_exit: Option<i32>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Per-test timeout override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<SkipDirective>,

    /// Nested tests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<SuiteTest>,
}

impl SuiteFile {
    /// Parse a suite file; the format follows the extension
    pub fn load(path: &Path) -> Result<Self, DiscoveryError> {
        let content = std::fs::read_to_string(path).map_err(|source| DiscoveryError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let parse_error = |message: String| DiscoveryError::Parse {
            path: path.to_path_buf(),
            message,
        };

        if is_json_file(path) {
            serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))
        } else {
            serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))
        }
    }

    /// Flatten the declaration tree into a discovered file
    pub fn into_discovered(
        self,
        path: &Path,
        scope_name: &str,
    ) -> Result<DiscoveredFile, DiscoveryError> {
        let mut file = DiscoveredFile::new(path, scope_name);
        let cwd = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf);
        let parent = file.scope.clone();
        flatten(path, &cwd, &parent, self.tests, &mut file.tests)?;
        Ok(file)
    }
}

fn flatten(
    path: &Path,
    cwd: &Option<PathBuf>,
    parent: &Scope,
    tests: Vec<SuiteTest>,
    out: &mut Vec<DeclaredTest>,
) -> Result<(), DiscoveryError> {
    let mut seen = HashSet::new();

    for test in tests {
        let scope = parent.child(test.name.clone());
        if !seen.insert(test.name.clone()) {
            return Err(DiscoveryError::DuplicateName { scope });
        }

        let body = match &test.run {
            Some(line) => {
                let mut body = CommandBody::parse(line)
                    .map_err(|e| DiscoveryError::Parse {
                        path: path.to_path_buf(),
                        message: format!("test '{scope}': {e:#}"),
                    })?
                    .expect_exit(test.expect_exit.unwrap_or(0))
                    .env(test.env.clone());
                if let Some(cwd) = cwd {
                    body = body.cwd(cwd);
                }
                Some(Arc::new(body) as Arc<dyn TestBody>)
            }
            None => None,
        };

        let mut declared = DeclaredTest::new(scope.clone(), body);
        match &test.skip {
            Some(SkipDirective::Flag(true)) => declared = declared.skipped(None),
            Some(SkipDirective::Reason(reason)) => {
                declared = declared.skipped(Some(reason.clone()))
            }
            Some(SkipDirective::Flag(false)) | None => {}
        }
        if let Some(ms) = test.timeout_ms {
            declared = declared.with_timeout(Duration::from_millis(ms));
        }

        out.push(declared);
        flatten(path, cwd, &scope, test.tests, out)?;
    }

    Ok(())
}

fn is_json_file(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

/// Walks roots for suite files
#[derive(Clone, Debug)]
pub struct SuiteDiscovery {
    suffixes: Vec<String>,
}

impl Default for SuiteDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect())
    }
}

impl SuiteDiscovery {
    pub fn new(suffixes: Vec<String>) -> Self {
        Self { suffixes }
    }

    /// Load a single suite file under the given file scope name
    pub fn load(&self, path: &Path, scope_name: &str) -> Result<DiscoveredFile, DiscoveryError> {
        let file = SuiteFile::load(path)?.into_discovered(path, scope_name)?;
        debug!(file = %path.display(), tests = file.tests.len(), "loaded suite file");
        Ok(file)
    }
}

impl Discovery for SuiteDiscovery {
    fn discover(&self, root: &Path) -> Result<Vec<DiscoveredFile>, DiscoveryError> {
        if !root.exists() {
            return Err(DiscoveryError::NotFound(root.to_path_buf()));
        }
        if root.is_file() {
            return Ok(vec![self.load(root, &root.display().to_string())?]);
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|source| DiscoveryError::Walk {
                root: root.to_path_buf(),
                source,
            })?;
            if entry.file_type().is_file() && self.is_test_file(entry.path()) {
                let scope_name = entry.path().display().to_string();
                files.push(self.load(entry.path(), &scope_name)?);
            }
        }

        info!(root = %root.display(), files = files.len(), "discovered suite files");
        Ok(files)
    }

    fn is_test_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| self.suffixes.iter().any(|suffix| name.ends_with(suffix.as_str())))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::TestMode;
    use std::fs;

    const SUITE: &str = r#"
tests:
  - name: compiles
    run: "true"
  - name: parser
    tests:
      - name: empty input
        run: sh -c 'exit 2'
        expect_exit: 2
        timeout_ms: 250
      - name: unicode
        skip: waiting on upstream fix
  - name: later
    skip: true
"#;

    #[test]
    fn test_flatten_parent_before_child() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parse.test.yaml");
        fs::write(&path, SUITE).unwrap();

        let file = SuiteDiscovery::default().load(&path, "parse.test.yaml").unwrap();
        let scopes: Vec<String> = file.tests.iter().map(|t| t.scope.to_string()).collect();
        assert_eq!(
            scopes,
            vec![
                "parse.test.yaml › compiles",
                "parse.test.yaml › parser",
                "parse.test.yaml › parser › empty input",
                "parse.test.yaml › parser › unicode",
                "parse.test.yaml › later",
            ]
        );

        assert!(file.tests[0].body.is_some());
        assert!(file.tests[1].body.is_none());
        assert_eq!(file.tests[2].timeout, Some(Duration::from_millis(250)));
        assert_eq!(
            file.tests[3].mode,
            TestMode::Skip {
                reason: Some("waiting on upstream fix".to_string())
            }
        );
        assert_eq!(file.tests[4].mode, TestMode::Skip { reason: None });
    }

    #[test]
    fn test_duplicate_sibling_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.test.yaml");
        fs::write(&path, "tests:\n  - name: a\n  - name: a\n").unwrap();

        let err = SuiteDiscovery::default().load(&path, "dup").unwrap_err();
        assert!(matches!(err, DiscoveryError::DuplicateName { .. }));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.test.yaml");
        fs::write(&path, "tests:\n  - name: a\n    runn: ls\n").unwrap();

        let err = SuiteDiscovery::default().load(&path, "bad").unwrap_err();
        assert!(matches!(err, DiscoveryError::Parse { .. }));
    }

    #[test]
    fn test_json_suite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.test.json");
        fs::write(&path, r#"{"tests": [{"name": "ping", "run": "true"}]}"#).unwrap();

        let file = SuiteDiscovery::default().load(&path, "api").unwrap();
        assert_eq!(file.tests.len(), 1);
    }

    #[test]
    fn test_discover_walks_sorted_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.test.yaml"), "tests: []").unwrap();
        fs::write(dir.path().join("a.test.yml"), "tests: []").unwrap();
        fs::write(dir.path().join("nested/c.test.json"), r#"{"tests": []}"#).unwrap();
        fs::write(dir.path().join("notes.yaml"), "ignored: true").unwrap();

        let files = SuiteDiscovery::default().discover(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| {
                f.path
                    .strip_prefix(dir.path())
                    .unwrap()
                    .display()
                    .to_string()
            })
            .collect();
        assert_eq!(names, vec!["a.test.yml", "b.test.yaml", "nested/c.test.json"]);
        assert_eq!(files[0].scope.level(), 1);
    }

    #[test]
    fn test_missing_root() {
        let err = SuiteDiscovery::default()
            .discover(Path::new("/nonexistent/testhive/root"))
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound(_)));
    }
}
