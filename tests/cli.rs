mod common;

use std::fs;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use common::*;
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

/// 数据目录中放入三张图片，不建立索引
#[fixture]
fn data_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    let images = dir.path().join("images");
    fs::create_dir_all(&images).unwrap();
    fs::write(images.join("airport_1.png"), png(RED)).unwrap();
    fs::write(images.join("beach_2.jpg"), jpeg(BLUE)).unwrap();
    fs::write(images.join("forest_3.jpg"), jpeg(GREEN)).unwrap();
    dir
}

#[rstest]
fn stats_without_index(data_dir: TempDir) -> Result<()> {
    cargo_run!("rsretrieval", "-d", data_dir.path(), "stats")
        .success()
        .stdout(predicate::str::contains("图片数量\t3"))
        .stdout(predicate::str::contains(".jpg\t2"))
        .stdout(predicate::str::contains("索引未就绪"));

    let output = Command::cargo_bin("rsretrieval")?
        .arg("-d")
        .arg(data_dir.path())
        .args(["stats", "--output-format", "json"])
        .output()?;
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(stats["total_images"], 3);
    assert_eq!(stats["indexed"], serde_json::Value::Null);
    Ok(())
}

#[rstest]
fn list_pages(data_dir: TempDir) -> Result<()> {
    cargo_run!("rsretrieval", "-d", data_dir.path(), "list", "--per-page", "2")
        .success()
        .stdout(predicate::str::contains("第 1/2 页，共 3 张图片"));
    cargo_run!("rsretrieval", "-d", data_dir.path(), "list", "--page", "0").failure();
    Ok(())
}

#[rstest]
fn remove_image(data_dir: TempDir) -> Result<()> {
    cargo_run!("rsretrieval", "-d", data_dir.path(), "remove", "beach_2.jpg")
        .success()
        .stdout(predicate::str::contains("beach_2.jpg"));
    assert!(!data_dir.path().join("images/beach_2.jpg").exists());

    cargo_run!("rsretrieval", "-d", data_dir.path(), "remove", "beach_2.jpg")
        .failure()
        .stderr(predicate::str::contains("文件不存在"));
    cargo_run!("rsretrieval", "-d", data_dir.path(), "remove", "../history.json")
        .failure()
        .stderr(predicate::str::contains("无效的文件名"));
    Ok(())
}

#[rstest]
#[case::add(&["add", "images/airport_1.png"])]
#[case::rebuild(&["rebuild"])]
#[case::search(&["search", "text", "airport"])]
fn model_required(data_dir: TempDir, #[case] args: &[&str]) -> Result<()> {
    Command::cargo_bin("rsretrieval")?
        .current_dir(data_dir.path())
        .arg("-d")
        .arg(data_dir.path())
        .args(args)
        .assert()
        .failure()
        .stderr(predicate::str::contains("嵌入模型"));
    Ok(())
}

#[rstest]
fn images_dir_override(data_dir: TempDir) -> Result<()> {
    let other = TempDir::new()?;
    let images = data_dir.path().join("images");
    cargo_run!("rsretrieval", "-d", other.path(), "--images-dir", images, "stats")
        .success()
        .stdout(predicate::str::contains("图片数量\t3"));
    Ok(())
}

#[rstest]
fn history_commands() -> Result<()> {
    let dir = TempDir::new()?;
    cargo_run!("rsretrieval", "-d", dir.path(), "history").success().stdout(predicate::str::is_empty());

    fs::write(
        dir.path().join("history.json"),
        r#"[
            {"timestamp": "2025-03-01T10:00:00+08:00", "type": "text_to_image", "query": "airport", "topk": 5, "results": ["airport_1.png"]},
            {"timestamp": "2025-03-02T10:00:00+08:00", "type": "image_to_caption", "query": "beach_2.jpg", "topk": 5, "results": ["a yellow beach ."]}
        ]"#,
    )?;

    let output = Command::cargo_bin("rsretrieval")?.arg("-d").arg(dir.path()).arg("history").output()?;
    let stdout = String::from_utf8(output.stdout)?;
    // 新记录在前
    assert!(stdout.find("image_to_caption").unwrap() < stdout.find("text_to_image").unwrap());

    cargo_run!("rsretrieval", "-d", dir.path(), "history", "remove", "2025-03-01T10:00:00+08:00").success();
    cargo_run!("rsretrieval", "-d", dir.path(), "history", "remove", "2025-03-01T10:00:00+08:00").failure();
    cargo_run!("rsretrieval", "-d", dir.path(), "history")
        .success()
        .stdout(predicate::str::contains("beach_2.jpg").and(predicate::str::contains("airport").not()));

    cargo_run!("rsretrieval", "-d", dir.path(), "history", "clear").success();
    cargo_run!("rsretrieval", "-d", dir.path(), "history").success().stdout(predicate::str::is_empty());
    Ok(())
}

#[rstest]
fn captions_require_text() -> Result<()> {
    let dir = TempDir::new()?;
    let source = dir.path().join("captions.txt");
    fs::write(&source, "\n   \n")?;
    cargo_run!("rsretrieval", "-d", dir.path(), "captions", &source)
        .failure()
        .stderr(predicate::str::contains("没有描述文本"));
    Ok(())
}
