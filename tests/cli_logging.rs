use predicates::prelude::*;

const BOOK: &str = r#"
recipes:
  - { recipe: daily, slug: daily, name: Daily, src_ext: epub, category: News }
  - { recipe: paused, slug: paused, name: Paused, src_ext: epub, category: News, enable_on: { kind: never } }
"#;

#[test]
fn enabled_prints_scheduled_slugs() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let recipes = temp.path().join("recipes.yaml");
    std::fs::write(&recipes, BOOK)?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("presspack");
    cmd.env_remove("PRESSPACK_RECIPES")
        .current_dir(temp.path())
        .args(["enabled", "--recipes", "recipes.yaml"])
        .assert()
        .success()
        .stdout("daily\n");
    Ok(())
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    std::fs::write(temp.path().join("recipes.yaml"), BOOK)?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("presspack");
    cmd.env("RUST_LOG", "debug")
        .env_remove("PRESSPACK_RECIPES")
        .current_dir(temp.path())
        .args(["enabled"])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
    Ok(())
}

#[test]
fn missing_recipe_book_fails_with_context() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("presspack");
    cmd.env_remove("PRESSPACK_RECIPES")
        .current_dir(temp.path())
        .args(["enabled", "--recipes", "missing.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("load recipe book"));
    Ok(())
}
