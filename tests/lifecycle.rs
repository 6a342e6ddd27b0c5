use openmog::{
    config::{ConfigLoader, Configuration, Format, Strictness},
    context::{AgentContext, AgentStatus},
    error::Error,
    runner::{AgentRunner, RunOptions},
};
use std::fs;
use tempfile::tempdir;

#[test]
fn loaded_config_runs_to_completion() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        "purpose: \"demo\"\nagent_parameters:\n  model: small\n  limits:\n    max_tokens: 256\n",
    )
    .unwrap();

    let config = ConfigLoader::new()
        .strictness(Strictness::Strict)
        .load(&path)
        .unwrap();
    let mut ctx = AgentContext::create(config);
    assert_eq!(ctx.working_dir(), dir.path());

    let mut runner = AgentRunner::new(Vec::<u8>::new());
    let result = runner.execute(&mut ctx);

    assert_eq!(result.status(), AgentStatus::Completed);
    assert_eq!(result.exit_code(), 0);
    assert_eq!(ctx.status(), AgentStatus::Completed);
    assert!(ctx.finished_at().unwrap() >= ctx.created_at());

    let text = String::from_utf8(runner.into_inner()).unwrap();
    assert!(text.contains("Purpose: demo"));
    assert!(text.contains("- limits = {\"max_tokens\":256}"));
}

#[test]
fn config_errors_surface_before_a_context_exists() {
    let dir = tempdir().unwrap();

    let err = Configuration::load(dir.path().join("missing.yaml")).unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    let path = dir.path().join("config.json");
    fs::write(&path, "{\"agent_parameters\": {}}").unwrap();
    let err = Configuration::load(&path).unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn toml_document_survives_reserialization() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("agent.toml");
    fs::write(
        &path,
        "purpose = \"index docs\"\n\n[agent_parameters]\nbatch = 8\nratio = 0.75\nsources = [\"wiki\", \"blog\"]\n",
    )
    .unwrap();

    let loaded = Configuration::load(&path).unwrap();
    fs::write(&path, loaded.to_document(Format::Toml).unwrap()).unwrap();
    assert_eq!(Configuration::load(&path).unwrap(), loaded);
}

#[test]
fn dry_run_completes_without_output_from_the_task() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, "purpose: demo\n").unwrap();

    let mut ctx = AgentContext::create(Configuration::load(&path).unwrap());
    let mut runner = AgentRunner::new(Vec::<u8>::new()).with_options(RunOptions { dry_run: true });
    let result = runner.execute(&mut ctx);

    assert!(result.is_success());
    assert_eq!(result.summary(), Some("dry run; task not executed"));
    let text = String::from_utf8(runner.into_inner()).unwrap();
    assert_eq!(text, "[dry-run] would run task `describe`\n");
}
