//! Replay stored run configurations and assert they still pass the audit.

use std::fs;
use std::path::{Path, PathBuf};

use mlfq_sim::RunConfig;

use super::run_audited;

#[derive(Debug, serde::Deserialize)]
struct CorpusCase {
    #[allow(dead_code)]
    description: String,
    config: RunConfig,
    /// Expected priority histories, by pid, when the case pins them.
    #[serde(default)]
    histories: Vec<Vec<i8>>,
}

fn corpus_dir() -> PathBuf {
    PathBuf::from("tests").join("corpus").join("mlfq")
}

fn list_cases(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut cases: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|s| s.to_str())
                .map(|name| name.ends_with(".case.json"))
                .unwrap_or(false)
        })
        .collect();
    cases.sort();
    cases
}

#[test]
fn replay_mlfq_corpus_cases() {
    let cases = list_cases(&corpus_dir());
    assert!(!cases.is_empty(), "no corpus cases under {:?}", corpus_dir());

    for path in cases {
        let bytes = fs::read(&path).expect("read corpus case");
        let case: CorpusCase = serde_json::from_slice(&bytes).expect("parse corpus case");
        let (report, _) = run_audited(&case.config);

        for (pid, expected) in case.histories.iter().enumerate() {
            assert_eq!(
                &report.processes[pid].priority_history, expected,
                "{path:?}: pid {pid} history"
            );
        }
    }
}
