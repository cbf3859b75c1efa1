use std::error::Error;
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn write_lines(path: &Path, count: usize) -> Result<(), Box<dyn Error>> {
    let text: String = (1..=count).map(|line| format!("line {line}\n")).collect();
    fs::write(path, text)?;
    Ok(())
}

fn spoolkit() -> Result<Command, Box<dyn Error>> {
    Ok(Command::cargo_bin("spoolkit")?)
}

#[test]
fn print_writes_a_pdf_next_to_the_output() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("notes.txt");
    write_lines(&input, 130)?;
    let output = dir.path().join("out");

    spoolkit()?
        .args(["print", input.to_str().unwrap(), "--lines-per-page", "50", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Spooled 3 page(s) of 'notes.txt'"));

    let bytes = fs::read(output.join("notes.txt.pdf"))?;
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.starts_with("%PDF-1.4"));
    assert!(text.contains("/Count 3"));
    assert!(text.contains("(line 101) Tj"));
    Ok(())
}

#[test]
fn print_honours_page_ranges_and_title() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("report.txt");
    write_lines(&input, 40)?;

    spoolkit()?
        .args([
            "print",
            input.to_str().unwrap(),
            "--lines-per-page",
            "10",
            "--pages",
            "2,4",
            "--title",
            "Q3: summary",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Spooled 2 page(s) of 'Q3: summary'"));

    let bytes = fs::read(dir.path().join("Q3_ summary.pdf"))?;
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("/Count 2"));
    assert!(text.contains("(line 11) Tj"));
    assert!(text.contains("(line 31) Tj"));
    assert!(!text.contains("(line 21) Tj"));
    Ok(())
}

#[test]
fn dry_run_writes_nothing() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("draft.txt");
    write_lines(&input, 15)?;

    spoolkit()?
        .args(["print", input.to_str().unwrap(), "--dry-run", "--lines-per-page", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run: spooled 2 page(s) of 'draft.txt'"));

    let entries = fs::read_dir(dir.path())?.count();
    assert_eq!(entries, 1);
    Ok(())
}

#[test]
fn print_rejects_ranges_past_the_last_page() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("short.txt");
    write_lines(&input, 5)?;

    spoolkit()?
        .args(["print", input.to_str().unwrap(), "--pages", "1-3", "--lines-per-page", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("past the last page"));
    assert!(!dir.path().join("short.txt.pdf").exists());
    Ok(())
}

#[test]
fn print_reports_missing_input() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    spoolkit()?
        .args(["print"])
        .arg(dir.path().join("missing.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error: failed to read"));
    Ok(())
}

#[test]
fn config_dump_dir_redirects_the_spool() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("log.txt");
    write_lines(&input, 3)?;
    let dumps = dir.path().join("dumps");
    let config = dir.path().join("printing.json");
    fs::write(
        &config,
        serde_json::to_string(&serde_json::json!({ "debug_dump_dir": dumps }))?,
    )?;

    spoolkit()?
        .arg("--config")
        .arg(&config)
        .args(["print", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("log.txt.prn"));

    assert!(dumps.join("log.txt.prn").exists());
    assert!(!dir.path().join("log.txt.pdf").exists());
    Ok(())
}

#[test]
fn invalid_config_is_reported() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let config = dir.path().join("broken.json");
    fs::write(&config, "{ not json")?;

    spoolkit()?
        .arg("--config")
        .arg(&config)
        .args(["pages", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
    Ok(())
}

#[test]
fn pages_lists_and_walks_ranges() -> Result<(), Box<dyn Error>> {
    spoolkit()?
        .args(["pages", "10-12, 1-3", "--page-count", "20"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ranges: 1-3 10-12"))
        .stdout(predicate::str::contains("Pages (6): 1 2 3 10 11 12"))
        .stdout(predicate::str::contains(
            "Walk over 20 page(s): 1 2 3 10 11 12",
        ));
    Ok(())
}

#[test]
fn pages_json_without_page_count() -> Result<(), Box<dyn Error>> {
    let output = spoolkit()?.args(["pages", "2,5-6", "--json"]).output()?;
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(value["ranges"], serde_json::json!(["2", "5-6"]));
    assert_eq!(value["pages"], serde_json::json!([2, 5, 6]));
    assert!(value["walk"].is_null());
    Ok(())
}

#[test]
fn pages_refuses_to_list_huge_ranges() -> Result<(), Box<dyn Error>> {
    spoolkit()?
        .args(["pages", "1-4294967295"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("covers 4294967295 pages"));

    spoolkit()?
        .args(["pages", "1-3", "--page-count", "4294967295"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Walk over 4294967295 page(s): 1 2 3"));
    Ok(())
}

#[test]
fn pages_rejects_reversed_ranges() -> Result<(), Box<dyn Error>> {
    spoolkit()?
        .args(["pages", "3-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid page list '3-1'"));
    Ok(())
}
