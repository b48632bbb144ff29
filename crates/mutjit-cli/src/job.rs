//! Job files: the modules, tests and configuration of one run.

use anyhow::{bail, Context, Result};
use mutjit_core::{EngineConfig, TestDescriptor};
use mutjit_ir::{ModuleRole, MutationOperator, Program, ProgramUnit};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Source path, used for the module identifier and diagnostics
    pub path: String,
    pub role: ModuleRole,
    pub program: Program,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,
    /// Function called to run the test
    pub entry: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub modules: Vec<ModuleSpec>,
    pub tests: Vec<TestSpec>,
    #[serde(default)]
    pub config: EngineConfig,
    /// Operator ids to apply; empty means all
    #[serde(default)]
    pub operators: Vec<String>,
}

impl Job {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse job file {}", path.display()))
    }

    pub fn units(&self) -> Result<Vec<ProgramUnit>> {
        self.modules
            .iter()
            .map(|m| {
                ProgramUnit::new(m.program.clone(), m.role, &m.path)
                    .with_context(|| format!("failed to load module {}", m.path))
            })
            .collect()
    }

    pub fn tests(&self) -> Vec<TestDescriptor> {
        self.tests
            .iter()
            .map(|t| TestDescriptor::new(&t.name, &t.entry).with_arguments(t.arguments.clone()))
            .collect()
    }

    pub fn operators(&self) -> Result<Vec<MutationOperator>> {
        if self.operators.is_empty() {
            return Ok(MutationOperator::all());
        }
        let mut operators = Vec::with_capacity(self.operators.len());
        for id in &self.operators {
            match MutationOperator::from_id(id) {
                Some(op) => operators.push(op),
                None => bail!("unknown mutation operator '{}'", id),
            }
        }
        Ok(operators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mutjit_ir::{Function, Instruction, Register, ReturnType, Value};
    use std::io::Write;

    fn job() -> Job {
        let mut answer = Function::new("answer".to_string(), 0, ReturnType::Int);
        answer.blocks[0].add_instruction(Instruction::load_const(Register(0), Value::Int(42)));
        answer.blocks[0].add_instruction(Instruction::return_value(Register(0)));

        Job {
            modules: vec![ModuleSpec {
                path: "src/answer.ir".to_string(),
                role: ModuleRole::Source,
                program: Program::with_functions(vec![answer]),
            }],
            tests: vec![TestSpec {
                name: "answer".to_string(),
                entry: "answer".to_string(),
                arguments: vec!["--fast".to_string()],
            }],
            config: EngineConfig::default(),
            operators: vec!["scalar_value_mutator".to_string()],
        }
    }

    #[test]
    fn test_load_job_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&job()).unwrap().as_bytes())
            .unwrap();

        let loaded = Job::load(file.path()).unwrap();
        let units = loaded.units().unwrap();
        assert_eq!(units.len(), 1);
        assert!(units[0].identifier().starts_with("answer_"));

        let tests = loaded.tests();
        assert_eq!(tests[0].program_arguments, vec!["--fast".to_string()]);
        assert_eq!(loaded.operators().unwrap(), vec![MutationOperator::ScalarValue]);
    }

    #[test]
    fn test_config_and_operators_default() {
        let mut value = serde_json::to_value(job()).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("config");
        object.remove("operators");

        let job: Job = serde_json::from_value(value).unwrap();
        assert!(job.config.call_tree);
        assert_eq!(job.operators().unwrap(), MutationOperator::all());
    }

    #[test]
    fn test_unknown_operator() {
        let mut job = job();
        job.operators = vec!["swap_everything".to_string()];
        assert!(job.operators().is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Job::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read job file"));
    }
}
