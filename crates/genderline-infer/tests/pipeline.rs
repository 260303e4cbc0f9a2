//! Pipeline tests against an in-process chat backend.
//!
//! The real-model test needs a running Ollama server and is #[ignore]d.
//! Run with: cargo test -p genderline-infer --test pipeline -- --ignored

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use genderline_core::{HttpError, Limits, ProgressContext, ShutdownFlag};
use genderline_infer::{
    BackendError, ChatBackend, ChatReply, Config, Pipeline, PipelineState, RunSummary,
};
use rustc_hash::FxHashMap;
use tempfile::TempDir;

type Responder = Box<dyn Fn(&str, &str) -> Result<String, BackendError> + Send + Sync>;

/// Backend that records every call and how many overlapped
struct Instrumented {
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: Mutex<Vec<String>>,
    delay: Duration,
    respond: Responder,
}

impl Instrumented {
    fn new(
        respond: impl Fn(&str, &str) -> Result<String, BackendError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            delay: Duration::from_millis(5),
            respond: Box::new(respond),
        })
    }

    fn answering() -> Arc<Self> {
        Self::new(|first, last| Ok(answer(first, last, "female", "common name")))
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl ChatBackend for Instrumented {
    async fn complete(&self, prompt: &str) -> Result<ChatReply, BackendError> {
        let (first, last) = names_in(prompt);
        self.calls.lock().unwrap().push(format!("{first} {last}"));

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        (self.respond)(&first, &last).map(|content| ChatReply { content })
    }
}

/// Pull the two names back out of the prompt text
fn names_in(prompt: &str) -> (String, String) {
    let field = |marker: &str| {
        prompt
            .lines()
            .find_map(|line| line.strip_prefix(marker))
            .and_then(|rest| rest.strip_suffix('.'))
            .unwrap_or_default()
            .to_string()
    };
    (
        field("The first name of the author is: "),
        field("The last name of the author is: "),
    )
}

fn answer(first: &str, last: &str, gender: &str, reasoning: &str) -> String {
    serde_json::json!({
        "author": {
            "first_name": first,
            "last_name": last,
            "gender": gender,
            "reasoning": reasoning,
        }
    })
    .to_string()
}

fn refused() -> BackendError {
    BackendError::Http(HttpError::Connect("connection refused".to_string()))
}

const INPUT_HEADER: &str =
    "paper_id\tfirst_author_firstName\tfirst_author_lastName\tlast_author_firstName\tlast_author_lastName";

fn write_input(dir: &Path, rows: &[[&str; 4]]) -> PathBuf {
    let path = dir.join("papers.tsv");
    let mut content = format!("{INPUT_HEADER}\n");
    for (i, row) in rows.iter().enumerate() {
        content.push_str(&format!("W{i}\t{}\n", row.join("\t")));
    }
    std::fs::write(&path, content).unwrap();
    path
}

/// `count` rows with two distinct authors each
fn many_authors(count: usize) -> Vec<[String; 4]> {
    (0..count)
        .map(|i| {
            [
                format!("First{i}"),
                format!("Lead{i}"),
                format!("Last{i}"),
                format!("Senior{i}"),
            ]
        })
        .collect()
}

fn write_owned_input(dir: &Path, rows: &[[String; 4]]) -> PathBuf {
    let borrowed: Vec<[&str; 4]> = rows
        .iter()
        .map(|r| [r[0].as_str(), r[1].as_str(), r[2].as_str(), r[3].as_str()])
        .collect();
    write_input(dir, &borrowed)
}

fn config(dir: &Path, input: PathBuf) -> Config {
    Config::new(input, dir.join("out").join("authors.tsv"))
}

async fn run(config: Config, backend: Arc<Instrumented>) -> anyhow::Result<RunSummary> {
    run_with(config, backend, ShutdownFlag::new()).await
}

async fn run_with(
    config: Config,
    backend: Arc<Instrumented>,
    shutdown: ShutdownFlag,
) -> anyhow::Result<RunSummary> {
    let mut pipeline = Pipeline::new(
        config,
        backend,
        Arc::new(ProgressContext::hidden()),
        shutdown,
    );
    let summary = pipeline.run().await?;
    assert_eq!(pipeline.state(), PipelineState::Done);
    Ok(summary)
}

/// Data rows of the output, split into fields
fn output_rows(path: &Path) -> Vec<Vec<String>> {
    let content = std::fs::read_to_string(path).unwrap();
    let mut lines = content.lines();
    assert_eq!(
        lines.next(),
        Some("first_name\tlast_name\tgender\treasoning")
    );
    lines
        .map(|line| line.split('\t').map(str::to_string).collect())
        .collect()
}

fn key_counts(rows: &[Vec<String>]) -> FxHashMap<String, usize> {
    let mut counts = FxHashMap::default();
    for row in rows {
        *counts.entry(format!("{} {}", row[0], row[1])).or_default() += 1;
    }
    counts
}

#[tokio::test]
async fn three_unique_authors_from_overlapping_rows() {
    let dir = TempDir::new().unwrap();
    let input = write_input(
        dir.path(),
        &[
            ["Maria", "Silva", "John", "Doe"],
            ["John", "Doe", "Ana", "Costa"],
        ],
    );
    let config = config(dir.path(), input);
    let output = config.output.clone();
    let backend = Instrumented::answering();

    let summary = run(config, backend.clone()).await.unwrap();

    assert_eq!(summary.source.rows_read, 2);
    assert_eq!(summary.source.pairs, 4);
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.rows_written, 3);
    assert!(!summary.interrupted);

    // Dispatch follows source order with the duplicate removed
    assert_eq!(backend.calls(), vec!["Maria Silva", "John Doe", "Ana Costa"]);

    let rows = output_rows(&output);
    assert_eq!(rows.len(), 3);
    let mut keys: Vec<String> = key_counts(&rows).into_keys().collect();
    keys.sort();
    assert_eq!(keys, vec!["Ana Costa", "John Doe", "Maria Silva"]);
}

#[tokio::test]
async fn duplicate_across_roles_dispatched_once() {
    let dir = TempDir::new().unwrap();
    let input = write_input(
        dir.path(),
        &[
            ["Li", "Wei", "Kofi", "Mensah"],
            ["Kofi", "Mensah", "Li", "Wei"],
            ["Li", "Wei", "Li", "Wei"],
        ],
    );
    let config = config(dir.path(), input);
    let output = config.output.clone();
    let backend = Instrumented::answering();

    let summary = run(config, backend.clone()).await.unwrap();

    assert_eq!(summary.dispatched, 2);
    assert_eq!(summary.duplicates, 4);
    let calls = backend.calls();
    assert_eq!(calls.iter().filter(|c| *c == "Li Wei").count(), 1);
    assert_eq!(calls.iter().filter(|c| *c == "Kofi Mensah").count(), 1);
    assert!(key_counts(&output_rows(&output)).values().all(|&n| n == 1));
}

#[tokio::test]
async fn parallel_request_bound_respected() {
    let dir = TempDir::new().unwrap();
    let input = write_owned_input(dir.path(), &many_authors(20));
    let mut config = config(dir.path(), input);
    config.limits = Limits {
        max_loaded_models: 8,
        num_parallel: 3,
        max_queue: 16,
    };
    let backend = Instrumented::answering();

    let summary = run(config, backend.clone()).await.unwrap();

    assert_eq!(summary.dispatched, 40);
    assert!(backend.max_active() <= 3, "saw {}", backend.max_active());
    assert!(backend.max_active() >= 2, "calls never overlapped");
}

#[tokio::test]
async fn loaded_model_bound_respected() {
    let dir = TempDir::new().unwrap();
    let input = write_owned_input(dir.path(), &many_authors(10));
    let mut config = config(dir.path(), input);
    config.limits = Limits {
        max_loaded_models: 2,
        num_parallel: 6,
        max_queue: 8,
    };
    let backend = Instrumented::answering();

    run(config, backend.clone()).await.unwrap();

    assert!(backend.max_active() <= 2, "saw {}", backend.max_active());
}

#[tokio::test]
async fn concurrent_writes_never_corrupt_rows() {
    let dir = TempDir::new().unwrap();
    let input = write_owned_input(dir.path(), &many_authors(30));
    let mut config = config(dir.path(), input);
    config.limits = Limits {
        max_loaded_models: 8,
        num_parallel: 8,
        max_queue: 4,
    };
    let output = config.output.clone();
    let backend = Instrumented::new(|first, last| {
        Ok(answer(
            first,
            last,
            "male",
            &format!("{first}\tis usually\nmasculine;\r\n{last} is a surname"),
        ))
    });

    let summary = run(config, backend).await.unwrap();

    let rows = output_rows(&output);
    assert_eq!(rows.len(), 60);
    assert_eq!(summary.rows_written, 60);
    for row in &rows {
        assert_eq!(row.len(), 4, "bad row {row:?}");
        assert_eq!(row[2], "male");
    }
}

#[tokio::test]
async fn malformed_response_becomes_unknown() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &[["Maria", "Silva", "John", "Doe"]]);
    let config = config(dir.path(), input);
    let output = config.output.clone();
    let backend = Instrumented::new(|first, last| {
        if first == "John" {
            Ok("I cannot determine that, sorry.".to_string())
        } else {
            Ok(format!("Sure! {}", answer(first, last, "Female", "ok")))
        }
    });

    let summary = run(config, backend).await.unwrap();

    assert_eq!(summary.rows_written, 2);
    assert_eq!(summary.unparsed(), 1);
    let rows = output_rows(&output);
    let john = rows.iter().find(|r| r[0] == "John").unwrap();
    assert_eq!(john[..], ["John", "Doe", "unknown", ""]);
    let maria = rows.iter().find(|r| r[0] == "Maria").unwrap();
    assert_eq!(maria[2], "female");
}

#[tokio::test]
async fn not_retrievable_is_distinct_from_unknown() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &[["Kim", "Park", "Sam", "Lee"]]);
    let config = config(dir.path(), input);
    let output = config.output.clone();
    let backend = Instrumented::new(|first, last| {
        if first == "Kim" {
            Ok(answer(first, last, "not retrievable", "used for all genders"))
        } else {
            Ok("{not json".to_string())
        }
    });

    run(config, backend).await.unwrap();

    let rows = output_rows(&output);
    let kim = rows.iter().find(|r| r[0] == "Kim").unwrap();
    let sam = rows.iter().find(|r| r[0] == "Sam").unwrap();
    assert_eq!(kim[2], "not retrievable");
    assert_eq!(sam[2], "unknown");
}

#[tokio::test]
async fn backend_failure_skips_author_only() {
    let dir = TempDir::new().unwrap();
    let input = write_input(
        dir.path(),
        &[
            ["Maria", "Silva", "John", "Doe"],
            ["John", "Doe", "Ana", "Costa"],
        ],
    );
    let config = config(dir.path(), input);
    let output = config.output.clone();
    let backend = Instrumented::new(|first, last| {
        if first == "John" {
            Err(refused())
        } else {
            Ok(answer(first, last, "female", "ok"))
        }
    });

    let summary = run(config, backend.clone()).await.unwrap();

    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.backend_failures, 1);
    assert_eq!(summary.rows_written, 2);
    // No retry
    assert_eq!(backend.calls().iter().filter(|c| *c == "John Doe").count(), 1);
    assert!(!key_counts(&output_rows(&output)).contains_key("John Doe"));
}

#[tokio::test]
async fn resume_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let input = write_input(
        dir.path(),
        &[
            ["Maria", "Silva", "John", "Doe"],
            ["John", "Doe", "Ana", "Costa"],
        ],
    );

    // First run loses John Doe to a backend failure
    let flaky = Instrumented::new(|first, last| {
        if first == "John" {
            Err(refused())
        } else {
            Ok(answer(first, last, "female", "ok"))
        }
    });
    let first = config(dir.path(), input.clone());
    let output = first.output.clone();
    run(first, flaky).await.unwrap();
    assert_eq!(output_rows(&output).len(), 2);

    let mut second = config(dir.path(), input.clone());
    second.resume = true;
    let backend = Instrumented::answering();
    let summary = run(second, backend.clone()).await.unwrap();
    assert_eq!(summary.seeded, 2);
    assert_eq!(summary.already_written, 2);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(backend.calls(), vec!["John Doe"]);

    let mut third = config(dir.path(), input);
    third.resume = true;
    let backend = Instrumented::answering();
    let summary = run(third, backend.clone()).await.unwrap();
    assert_eq!(summary.dispatched, 0);
    assert!(backend.calls().is_empty());

    let rows = output_rows(&output);
    assert_eq!(rows.len(), 3);
    assert!(key_counts(&rows).values().all(|&n| n == 1));
}

#[tokio::test]
async fn resume_after_unfinished_last_row() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &[["Maria", "Silva", "John", "Doe"]]);
    let mut config = config(dir.path(), input);
    config.resume = true;
    let output = config.output.clone();
    std::fs::create_dir_all(output.parent().unwrap()).unwrap();
    std::fs::write(
        &output,
        "first_name\tlast_name\tgender\treasoning\nMaria\tSilva\tfemale\tok\nJohn\tDo",
    )
    .unwrap();
    let backend = Instrumented::answering();

    let summary = run(config, backend.clone()).await.unwrap();

    assert_eq!(summary.seeded, 1);
    assert_eq!(backend.calls(), vec!["John Doe"]);
    let rows = output_rows(&output);
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.len(), 4, "bad row {row:?}");
    }
    let counts = key_counts(&rows);
    assert_eq!(counts.get("John Doe"), Some(&1));
    assert!(!counts.contains_key("John Do"));
}

#[tokio::test]
async fn resume_onto_foreign_layout_is_fatal() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &[["Maria", "Silva", "John", "Doe"]]);
    let mut config = config(dir.path(), input);
    config.resume = true;
    let output = config.output.clone();
    std::fs::create_dir_all(output.parent().unwrap()).unwrap();
    let foreign = "author\tgender_author\treasoning_author\nMaria Silva\tfemale\tok\n";
    std::fs::write(&output, foreign).unwrap();
    let backend = Instrumented::answering();

    let err = run(config, backend.clone()).await.unwrap_err();

    assert!(format!("{err:#}").contains("header"), "{err:#}");
    assert!(backend.calls().is_empty());
    assert_eq!(std::fs::read_to_string(&output).unwrap(), foreign);
}

#[tokio::test]
async fn existing_output_without_continue_is_fatal() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &[["Maria", "Silva", "John", "Doe"]]);
    run(config(dir.path(), input.clone()), Instrumented::answering())
        .await
        .unwrap();

    let backend = Instrumented::answering();
    let err = run(config(dir.path(), input), backend.clone())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("--continue"));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn missing_input_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path(), dir.path().join("absent.tsv"));
    let output = config.output.clone();
    let err = run(config, Instrumented::answering()).await.unwrap_err();
    assert!(format!("{err:#}").contains("absent.tsv"));
    assert!(!output.exists());
}

#[tokio::test]
async fn incomplete_rows_skipped() {
    let dir = TempDir::new().unwrap();
    let input = write_input(
        dir.path(),
        &[
            ["Maria", "", "John", "Doe"],
            ["NaN", "Silva", "  ", "Costa"],
            ["Ana", "Costa", "null", "None"],
        ],
    );
    let config = config(dir.path(), input);
    let backend = Instrumented::answering();

    let summary = run(config, backend.clone()).await.unwrap();

    assert_eq!(summary.source.roles_skipped, 4);
    assert_eq!(backend.calls(), vec!["John Doe", "Ana Costa"]);
    assert_eq!(summary.rows_written, 2);
}

#[tokio::test]
async fn shutdown_stops_dispatch() {
    let dir = TempDir::new().unwrap();
    let input = write_owned_input(dir.path(), &many_authors(5));
    let config = config(dir.path(), input);
    let output = config.output.clone();
    let shutdown = ShutdownFlag::new();
    shutdown.request();
    let backend = Instrumented::answering();

    let summary = run_with(config, backend.clone(), shutdown).await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.dispatched, 0);
    assert!(backend.calls().is_empty());
    assert!(output_rows(&output).is_empty());
}

#[tokio::test]
async fn shutdown_during_dispatch_sends_nothing_more() {
    let dir = TempDir::new().unwrap();
    let input = write_owned_input(dir.path(), &many_authors(5));
    let mut config = config(dir.path(), input);
    config.limits = Limits {
        max_loaded_models: 1,
        num_parallel: 1,
        max_queue: 4,
    };
    let output = config.output.clone();
    let shutdown = ShutdownFlag::new();
    let stop = shutdown.clone();
    // The first call arrives while dispatch waits for its permit
    let backend = Instrumented::new(move |first, last| {
        stop.request();
        Ok(answer(first, last, "female", "ok"))
    });

    let summary = run_with(config, backend.clone(), shutdown).await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(backend.calls(), vec!["First0 Lead0"]);
    assert_eq!(output_rows(&output).len(), 1);
}

#[tokio::test]
async fn row_limit_caps_source_rows() {
    let dir = TempDir::new().unwrap();
    let input = write_owned_input(dir.path(), &many_authors(10));
    let mut config = config(dir.path(), input);
    config.row_limit = Some(3);

    let summary = run(config, Instrumented::answering()).await.unwrap();

    assert_eq!(summary.source.rows_read, 3);
    assert_eq!(summary.dispatched, 6);
}

/// Needs `ollama serve` and a pulled model (OLLAMA_MODEL, default llama3.1)
#[tokio::test]
#[ignore]
async fn real_local_model() {
    use genderline_infer::{BackendSettings, ChatClient, Gender};

    let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.1".to_string());
    let client = ChatClient::new(&BackendSettings::default(), &model)
        .expect("Failed to build client");

    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &[["Maria", "Silva", "John", "Doe"]]);
    let config = config(dir.path(), input);
    let output = config.output.clone();

    let mut pipeline = Pipeline::new(
        config,
        Arc::new(client),
        Arc::new(ProgressContext::hidden()),
        ShutdownFlag::new(),
    );
    let summary = pipeline.run().await.expect("Pipeline should succeed");
    assert_eq!(summary.backend_failures, 0);
    assert_eq!(summary.rows_written, 2);

    let rows = output_rows(&output);
    let maria = rows.iter().find(|r| r[0] == "Maria").unwrap();
    assert_eq!(maria[2], Gender::Female.as_str());
}
