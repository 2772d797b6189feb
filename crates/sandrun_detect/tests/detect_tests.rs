//! Integration tests for detection and scaffolding.

use std::fs;
use std::path::Path;

use sandrun_detect::{
    run_commands, validate_dockerfile, DockerfileSynthesizer, FrameworkDetector, FrameworkKind,
    COMPOSE_FILE, DOCKERFILE, DOCKERIGNORE,
};
use tempfile::tempdir;

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_vite_react_project_end_to_end() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "package.json",
        r#"{
            "name": "demo",
            "scripts": {"dev": "vite"},
            "dependencies": {"react": "^18.2.0", "react-dom": "^18.2.0"},
            "devDependencies": {"vite": "^5.0.0", "@vitejs/plugin-react": "^4.2.0"}
        }"#,
    );
    write(dir.path(), "pnpm-lock.yaml", "lockfileVersion: '6.0'\n");

    let framework = FrameworkDetector::new().detect(dir.path());
    assert_eq!(framework.kind, FrameworkKind::ReactVite);
    assert_eq!(framework.default_port, 5173);

    let plan = run_commands(&framework, framework.default_port);
    assert_eq!(plan.setup[0].command, "pnpm install");
    assert!(plan.serve.command.contains("--port 5173"));
    assert!(plan.serve.command.contains("0.0.0.0"));
}

#[test]
fn test_scaffolding_is_idempotent() {
    let dir = tempdir().unwrap();
    write(dir.path(), "requirements.txt", "fastapi\nuvicorn[standard]\n");
    write(dir.path(), "main.py", "from fastapi import FastAPI\napp = FastAPI()\n");

    let synthesizer = DockerfileSynthesizer::new();
    let framework = FrameworkDetector::new().detect(dir.path());

    let (_, created) = synthesizer.ensure(dir.path(), &framework).unwrap();
    assert!(created);
    let first = fs::read_to_string(dir.path().join(DOCKERFILE)).unwrap();
    assert!(first.contains("uvicorn main:app --host 0.0.0.0 --port 8000"));
    assert!(dir.path().join(DOCKERIGNORE).exists());
    validate_dockerfile(&dir.path().join(DOCKERFILE)).unwrap();

    let (_, created) = synthesizer.ensure(dir.path(), &framework).unwrap();
    assert!(!created);
    let second = fs::read_to_string(dir.path().join(DOCKERFILE)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_existing_dockerfile_is_preserved() {
    let dir = tempdir().unwrap();
    write(dir.path(), "index.html", "<h1>hi</h1>");
    write(dir.path(), DOCKERFILE, "FROM nginx:alpine\nCOPY . /usr/share/nginx/html\n");

    let framework = FrameworkDetector::new().detect(dir.path());
    let (_, created) = DockerfileSynthesizer::new()
        .ensure(dir.path(), &framework)
        .unwrap();

    assert!(!created);
    let content = fs::read_to_string(dir.path().join(DOCKERFILE)).unwrap();
    assert!(content.starts_with("FROM nginx:alpine"));
}

#[test]
fn test_fullstack_writes_compose() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "frontend/package.json",
        r#"{"dependencies": {"vue": "^3.4.0"}, "devDependencies": {"vite": "^5.0.0"}}"#,
    );
    write(dir.path(), "backend/package.json", r#"{"dependencies": {"express": "^4.18.0"}}"#);
    write(dir.path(), "backend/server.js", "require('express')().listen(process.env.PORT)");

    let framework = FrameworkDetector::new().detect(dir.path());
    assert_eq!(framework.kind, FrameworkKind::Fullstack);

    DockerfileSynthesizer::new()
        .ensure(dir.path(), &framework)
        .unwrap();
    let compose = fs::read_to_string(dir.path().join(COMPOSE_FILE)).unwrap();
    assert!(compose.contains("\"3000:3000\""));
    assert!(compose.contains("\"5173:5173\""));
}

#[test]
fn test_nested_static_site() {
    let dir = tempdir().unwrap();
    write(dir.path(), "public/index.html", "<html></html>");
    write(dir.path(), "README.md", "# site");

    let framework = FrameworkDetector::new().detect(dir.path());
    assert_eq!(framework.kind, FrameworkKind::StaticHtml);
    assert_eq!(framework.working_dir.as_deref(), Some(Path::new("public")));
}

#[test]
fn test_unknown_with_start_script() {
    let dir = tempdir().unwrap();
    write(dir.path(), "start.sh", "#!/bin/sh\necho up\n");

    let framework = FrameworkDetector::new().detect(dir.path());
    assert!(framework.is_unknown());
    assert_eq!(framework.entry.as_deref(), Some("start.sh"));

    let plan = run_commands(&framework, 8080);
    assert_eq!(plan.serve.inline(), "PORT=8080 sh start.sh");
}
