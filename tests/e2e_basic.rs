use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn bin() -> Command {
    let path = assert_cmd::cargo::cargo_bin!("riddle-eval");
    Command::new(path)
}

const CORPUS: &str = r#"{"id": "WP-131", "question": "What is a boxer's favorite drink?", "answer": "Punch.", "label": 1, "choice_list": ["Coke.", "Punch.", "Sprite.", "None of above."]}
{"id": "WP-7", "question": "What TV program should you watch in the bathtub?", "answer": "Soap operas.", "label": 0, "choice_list": ["Soap operas.", "Sports live.", "Talk show.", "None of above."]}
"#;

const GENERATIONS: &str = r#"{"id": "WP-131", "mode": "zero_shot", "text": "Question: What is a boxer's favorite drink?\nAnswer: Punch."}
{"id": "WP-131", "mode": "few_shot", "text": "Answer: Sprite."}
{"id": "WP-7", "mode": "zero_shot", "text": "Answer: definitely soap operas"}
"#;

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path.display().to_string()
}

#[test]
fn resolves_exact_answer_as_json() {
    let assert = bin()
        .args([
            "--output",
            "json",
            "resolve",
            "--text",
            "...Answer: Punch.",
            "--choice",
            "Coke.",
            "--choice",
            "Punch.",
            "--choice",
            "Sprite.",
            "--choice",
            "None of above.",
        ])
        .assert()
        .success();

    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let json: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(json["answer"], "Punch.");
    assert_eq!(json["index"], 1);
    assert_eq!(json["method"], "exact");
    assert!(json["score"].is_null());
}

#[test]
fn resolves_by_similarity_in_text_mode() {
    bin()
        .args([
            "resolve",
            "--text",
            "I would watch soap operas",
            "--choice",
            "Sports live.",
            "--choice",
            "Soap operas.",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Answer: Soap operas."))
        .stdout(predicate::str::contains("Method: similarity"));
}

#[test]
fn duplicate_choices_fail() {
    bin()
        .args(["resolve", "--text", "x", "--choice", "A.", "--choice", "A."])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Invalid input"));
}

#[test]
fn evaluates_recorded_generations_and_writes_csv() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write(dir.path(), "test.jsonl", CORPUS);
    let generations = write(dir.path(), "generations.jsonl", GENERATIONS);
    let results = dir.path().join("out/results.csv");

    let assert = bin()
        .args([
            "--output",
            "json",
            "evaluate",
            "--corpus",
            &corpus,
            "--generations",
            &generations,
            "--results",
            &results.display().to_string(),
        ])
        .assert()
        .success();

    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let json: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(json["embedder"], "hash");

    let summaries = json["summaries"].as_array().unwrap();
    assert_eq!(summaries[0]["mode"], "zero_shot");
    assert_eq!(summaries[0]["correct"], 2);
    assert_eq!(summaries[1]["mode"], "few_shot");
    assert_eq!(summaries[1]["correct"], 0);
    assert_eq!(summaries[1]["failed"], 1);

    let missing = &json["records"][1]["outcomes"][1];
    assert!(missing["resolution"].is_null());
    assert!(missing["error"].as_str().unwrap().contains("no recorded few_shot generation"));

    let csv = fs::read_to_string(&results).unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("Question ID,Question,Answer,Choices,Generated Zero-Shot"));
    assert_eq!(lines.count(), 2);
}

#[test]
fn evaluate_text_summary_for_single_mode() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write(dir.path(), "test.jsonl", CORPUS);
    let generations = write(dir.path(), "generations.jsonl", GENERATIONS);

    bin()
        .args([
            "evaluate",
            "--corpus",
            &corpus,
            "--generations",
            &generations,
            "--mode",
            "zero-shot",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Questions: 2"))
        .stdout(predicate::str::contains("Zero-Shot  accuracy 100.00% (2/2), failed 0"))
        .stdout(predicate::str::contains("Few-Shot").not());
}

#[cfg(unix)]
#[test]
fn evaluates_with_generator_command() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write(dir.path(), "test.jsonl", CORPUS);

    // Echoes the prompt back: the text after the last "Answer:" is empty,
    // so each question resolves by similarity and nothing fails.
    let assert = bin()
        .args([
            "--output",
            "json",
            "evaluate",
            "--corpus",
            &corpus,
            "--generator",
            "cat",
            "--mode",
            "few-shot",
            "--jobs",
            "2",
        ])
        .assert()
        .success();

    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let json: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(json["summaries"][0]["failed"], 0);
    assert_eq!(json["records"][0]["outcomes"][0]["resolution"]["method"], "similarity");
}

#[test]
fn malformed_corpus_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = write(
        dir.path(),
        "bad.jsonl",
        r#"{"question": "q", "choice_list": ["a", "b"], "label": 5}"#,
    );
    let generations = write(dir.path(), "g.jsonl", "");

    bin()
        .args(["evaluate", "--corpus", &corpus, "--generations", &generations])
        .assert()
        .failure()
        .stderr(predicate::str::contains("label 5 out of range"));
}

#[test]
fn sweep_isolates_missing_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "test.jsonl", CORPUS);
    fs::create_dir_all(dir.path().join("checkpoints/llama_lora_finetuned_lr0.01_wd0.0001")).unwrap();
    let config = write(
        dir.path(),
        "sweep.toml",
        r#"
corpus = "test.jsonl"
checkpoint_root = "checkpoints"
results_dir = "results"
learning_rates = [0.1, 0.01]
weight_decays = [0.0001]
generator = "sh -c 'cat >/dev/null; echo Answer: Punch.'"
modes = ["zero_shot"]
"#,
    );

    let assert = bin()
        .args(["--output", "json", "sweep", "--config", &config])
        .assert()
        .success();

    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let runs: Value = serde_json::from_str(&output).unwrap();
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 2);

    assert_eq!(runs[0]["run_id"], "llama_lora_finetuned_lr0.1_wd0.0001");
    assert_eq!(runs[0]["status"], "failed");
    assert!(runs[0]["error"].as_str().unwrap().contains("not found"));

    if cfg!(unix) {
        assert_eq!(runs[1]["status"], "completed");
        assert_eq!(runs[1]["summaries"][0]["total"], 2);
        assert_eq!(runs[1]["summaries"][0]["failed"], 0);
        assert!(runs[1]["checkpoint"].is_string());
        assert!(
            dir.path()
                .join("results/llama_lora_finetuned_results_lr0.01_wd0.0001.csv")
                .exists()
        );
    }
}

#[test]
fn model_path_requires_tokenizer() {
    bin()
        .args(["--model-path", "model.safetensors", "resolve", "--text", "a", "--choice", "a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--tokenizer-path"));
}
