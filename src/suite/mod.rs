//! JSON test-suite model
//!
//! Wire schema:
//!
//! ```text
//! TestSuite := { srcFile, funcName, description, executed, coverage, testCases }
//! TestCase  := { inputs, outputs, description, pathId }
//! Var       := { name, type, data | expectation }
//! ```

use crate::cfg::{PathId, INVALID_PATH_ID};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One input argument of a test case
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputVar {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub data: String,
}

/// One expected output of a test case
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputVar {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub expectation: String,
}

/// A single test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub inputs: Vec<InputVar>,
    pub outputs: Vec<OutputVar>,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "pathId", default = "invalid_path_id")]
    pub path_id: PathId,
    /// Raw trace observed at the last execution; not part of the wire format
    #[serde(skip)]
    pub result: String,
}

fn invalid_path_id() -> PathId {
    INVALID_PATH_ID
}

impl TestCase {
    /// Compact rendering of the inputs, for diagnostics
    pub fn summary(&self) -> String {
        let data: Vec<&str> = self.inputs.iter().map(|arg| arg.data.as_str()).collect();
        format!("[{}]", data.join(", "))
    }
}

/// An ordered collection of test cases for one function
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSuite {
    #[serde(rename = "srcFile")]
    pub src_file: String,
    #[serde(rename = "funcName")]
    pub func_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub coverage: f64,
    #[serde(rename = "testCases")]
    pub test_cases: Vec<TestCase>,
}

impl TestSuite {
    /// Load a suite from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<TestSuite> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read test suite {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse test suite {}", path.display()))
    }

    /// Write the suite as pretty-printed JSON
    pub fn store(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).context("failed to serialize test suite")?;
        fs::write(path, text)
            .with_context(|| format!("failed to write test suite {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.test_cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.test_cases.is_empty()
    }

    pub fn case(&self, idx: usize) -> &TestCase {
        assert!(idx < self.test_cases.len(), "test index {idx} out of range");
        &self.test_cases[idx]
    }

    pub fn add_case(&mut self, case: TestCase) {
        self.test_cases.push(case);
    }

    /// Add a copy of `case` with every expectation blanked; the output
    /// variables themselves are kept so the shape of the case survives
    pub fn add_case_without_expectation(&mut self, case: &TestCase) {
        let mut stripped = case.clone();
        for output in &mut stripped.outputs {
            output.expectation.clear();
        }
        stripped.path_id = INVALID_PATH_ID;
        self.test_cases.push(stripped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_case(datum: &str, expectation: &str) -> TestCase {
        TestCase {
            inputs: vec![InputVar {
                name: "x".into(),
                ty: "int".into(),
                data: datum.into(),
            }],
            outputs: vec![OutputVar {
                name: "ret".into(),
                ty: "int".into(),
                expectation: expectation.into(),
            }],
            description: "sample".into(),
            path_id: 0,
            result: String::new(),
        }
    }

    #[test]
    fn test_wire_format_field_names() {
        let mut suite = TestSuite {
            src_file: "new.c".into(),
            func_name: "f".into(),
            description: "d".into(),
            executed: true,
            coverage: 0.5,
            test_cases: vec![],
        };
        suite.add_case(sample_case("3", "9"));

        let json = serde_json::to_string(&suite).unwrap();
        assert!(json.contains("\"srcFile\":\"new.c\""));
        assert!(json.contains("\"funcName\":\"f\""));
        assert!(json.contains("\"testCases\""));
        assert!(json.contains("\"pathId\":0"));
        assert!(json.contains("\"type\":\"int\""));
        // the transient result field is not serialized
        assert!(!json.contains("result"));
    }

    #[test]
    fn test_roundtrip() {
        let mut suite = TestSuite::default();
        suite.add_case(sample_case("3", "9"));
        let json = serde_json::to_string(&suite).unwrap();
        let back: TestSuite = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back.case(0).inputs[0].data, "3");
        assert_eq!(back.case(0).outputs[0].expectation, "9");
    }

    #[test]
    fn test_missing_path_id_defaults_invalid() {
        let json = r#"{"srcFile":"a.c","funcName":"f","testCases":
            [{"inputs":[],"outputs":[]}]}"#;
        let suite: TestSuite = serde_json::from_str(json).unwrap();
        assert_eq!(suite.case(0).path_id, INVALID_PATH_ID);
        assert!(!suite.executed);
    }

    #[test]
    fn test_add_case_without_expectation() {
        let mut suite = TestSuite::default();
        suite.add_case_without_expectation(&sample_case("7", "49"));

        let case = suite.case(0);
        assert_eq!(case.inputs[0].data, "7");
        assert_eq!(case.outputs.len(), 1);
        assert!(case.outputs[0].expectation.is_empty());
        assert_eq!(case.path_id, INVALID_PATH_ID);
    }

    #[test]
    fn test_case_summary() {
        let case = sample_case("42", "");
        assert_eq!(case.summary(), "[42]");
    }
}
