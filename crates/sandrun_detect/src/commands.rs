//! Setup and serve commands per framework.
//!
//! Every serve command binds `0.0.0.0` and takes the port as a literal
//! argument or a `PORT`-style environment variable, so a later port change
//! can be applied by rewriting the command text.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::framework::{Framework, FrameworkKind, PackageManager, Runtime};

/// A single shell command with its environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStep {
    pub command: String,
    pub env: HashMap<String, String>,
    /// Directory relative to the project root.
    pub workdir: Option<PathBuf>,
}

impl RunStep {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: HashMap::new(),
            workdir: None,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Command with its environment inlined as `KEY=value` prefixes.
    pub fn inline(&self) -> String {
        if self.env.is_empty() {
            return self.command.clone();
        }
        let mut keys: Vec<_> = self.env.keys().collect();
        keys.sort();
        let prefix: Vec<String> = keys
            .into_iter()
            .map(|k| format!("{}={}", k, self.env[k]))
            .collect();
        format!("{} {}", prefix.join(" "), self.command)
    }
}

/// Ordered setup steps followed by the long-running serve step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunPlan {
    pub setup: Vec<RunStep>,
    pub serve: RunStep,
}

impl RunPlan {
    /// Whole plan as one `&&`-joined shell script run from the project
    /// root. Steps with a working directory run in a subshell.
    pub fn script(&self) -> String {
        self.setup
            .iter()
            .chain(std::iter::once(&self.serve))
            .map(|step| match &step.workdir {
                Some(dir) => format!(
                    "(cd {} && {})",
                    dir.to_string_lossy().replace('\\', "/"),
                    step.inline()
                ),
                None => step.inline(),
            })
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

/// Build the run plan for `framework` listening on `port`.
pub fn run_commands(framework: &Framework, port: u16) -> RunPlan {
    let mut plan = match &framework.fullstack {
        Some(parts) => fullstack_plan(framework, parts.frontend, parts.backend, parts.backend_port, port),
        None => single_plan(framework.kind, framework, port),
    };

    if let Some(dir) = &framework.working_dir {
        for step in plan.setup.iter_mut().chain(std::iter::once(&mut plan.serve)) {
            if step.workdir.is_none() {
                step.workdir = Some(dir.clone());
            }
        }
    }
    plan
}

fn single_plan(kind: FrameworkKind, framework: &Framework, port: u16) -> RunPlan {
    RunPlan {
        setup: setup_steps(kind, framework),
        serve: serve_step(kind, framework, port),
    }
}

fn fullstack_plan(
    framework: &Framework,
    frontend: FrameworkKind,
    backend: FrameworkKind,
    backend_port: u16,
    port: u16,
) -> RunPlan {
    let backend_fw = Framework {
        kind: backend,
        package_manager: None,
        ..framework.clone()
    };
    let frontend_fw = Framework {
        kind: frontend,
        entry: None,
        ..framework.clone()
    };

    let mut setup: Vec<RunStep> = setup_steps(backend, &backend_fw)
        .into_iter()
        .map(|s| s.workdir("backend"))
        .collect();
    setup.extend(
        setup_steps(frontend, &frontend_fw)
            .into_iter()
            .map(|s| s.workdir("frontend")),
    );

    let backend_serve = serve_step(backend, &backend_fw, backend_port);
    let frontend_serve = serve_step(frontend, &frontend_fw, port);
    let command = format!(
        "(cd backend && {}) & (cd frontend && {}); wait",
        backend_serve.inline(),
        frontend_serve.inline()
    );

    RunPlan {
        setup,
        serve: RunStep::new(command).env("BACKEND_PORT", backend_port.to_string()),
    }
}

fn pm(framework: &Framework) -> PackageManager {
    framework.package_manager.unwrap_or(PackageManager::Npm)
}

fn setup_steps(kind: FrameworkKind, framework: &Framework) -> Vec<RunStep> {
    use FrameworkKind as K;

    match kind.runtime() {
        Runtime::Node if kind != K::Fullstack => {
            vec![RunStep::new(pm(framework).install_command())]
        }
        Runtime::Python => {
            vec![RunStep::new(
                "if [ -f requirements.txt ]; then pip install -r requirements.txt; \
                 elif [ -f pyproject.toml ]; then pip install .; fi",
            )]
        }
        Runtime::Php => {
            vec![RunStep::new(
                "if [ -f composer.json ]; then composer install --no-interaction; fi",
            )]
        }
        Runtime::Ruby => vec![RunStep::new("bundle install")],
        Runtime::Dart => vec![RunStep::new("flutter pub get")],
        Runtime::Go => vec![RunStep::new("go mod download")],
        Runtime::Rust => vec![RunStep::new("cargo build")],
        Runtime::DotNet => vec![RunStep::new("dotnet restore")],
        _ => Vec::new(),
    }
}

fn serve_step(kind: FrameworkKind, framework: &Framework, port: u16) -> RunStep {
    use FrameworkKind as K;

    let p = port.to_string();
    match kind {
        K::ReactVite | K::VueVite | K::SvelteVite | K::Vite | K::SvelteKit => {
            RunStep::new(format!("npx vite --port {} --host 0.0.0.0", p))
        }
        K::NextJs => RunStep::new(format!("npx next dev --port {} --hostname 0.0.0.0", p)),
        K::Nuxt => RunStep::new(format!("npx nuxi dev --port {} --host 0.0.0.0", p)),
        K::Astro => RunStep::new(format!("npx astro dev --port {} --host 0.0.0.0", p)),
        K::Angular => RunStep::new(format!("npx ng serve --port {} --host 0.0.0.0", p)),
        K::Remix => RunStep::new(pm(framework).run_script("dev")).env("PORT", &p),
        K::CreateReactApp => RunStep::new(pm(framework).run_script("start"))
            .env("PORT", &p)
            .env("HOST", "0.0.0.0")
            .env("BROWSER", "none"),
        K::NestJs | K::Fastify | K::Express | K::Node => {
            let command = match (&framework.entry, framework.has_start_script) {
                (_, true) => pm(framework).run_script("start"),
                (Some(entry), false) => format!("node {}", entry),
                (None, false) => "node index.js".to_string(),
            };
            RunStep::new(command).env("PORT", &p).env("HOST", "0.0.0.0")
        }
        K::Expo => RunStep::new(format!("npx expo start --web --port {}", p)),
        K::ReactNative => RunStep::new(format!("npx react-native start --port {}", p)),
        K::Hardhat => RunStep::new(format!("npx hardhat node --hostname 0.0.0.0 --port {}", p)),
        K::Truffle => RunStep::new(format!(
            "npx ganache --server.host 0.0.0.0 --server.port {}",
            p
        )),
        K::Foundry => RunStep::new(format!("anvil --host 0.0.0.0 --port {}", p)),
        K::Django => RunStep::new(format!("python manage.py runserver 0.0.0.0:{}", p)),
        K::FastApi => {
            let module = python_module(framework, "main");
            RunStep::new(format!(
                "uvicorn {}:app --host 0.0.0.0 --port {} --reload",
                module, p
            ))
        }
        K::Flask => RunStep::new(format!("flask run --host 0.0.0.0 --port {}", p))
            .env("FLASK_APP", framework.entry.as_deref().unwrap_or("app.py")),
        K::Streamlit => RunStep::new(format!(
            "streamlit run {} --server.port {} --server.address 0.0.0.0 --server.headless true",
            framework.entry.as_deref().unwrap_or("app.py"),
            p
        )),
        K::Gradio => RunStep::new(format!(
            "python {}",
            framework.entry.as_deref().unwrap_or("app.py")
        ))
        .env("GRADIO_SERVER_PORT", &p)
        .env("GRADIO_SERVER_NAME", "0.0.0.0"),
        K::Python => RunStep::new(format!(
            "python {}",
            framework.entry.as_deref().unwrap_or("main.py")
        ))
        .env("PORT", &p),
        K::SpringBoot => RunStep::new(format!(
            "mvn -q spring-boot:run -Dspring-boot.run.arguments=--server.port={}",
            p
        )),
        K::Quarkus => RunStep::new(format!(
            "mvn -q quarkus:dev -Dquarkus.http.port={} -Dquarkus.http.host=0.0.0.0",
            p
        )),
        K::Maven => RunStep::new("mvn -q compile exec:java").env("PORT", &p),
        K::Gradle => {
            let task = framework.entry.as_deref().unwrap_or("run");
            let args = if task == "bootRun" {
                format!(" --args=--server.port={}", p)
            } else {
                String::new()
            };
            RunStep::new(format!("gradle {}{}", task, args)).env("PORT", &p)
        }
        K::Laravel => RunStep::new(format!("php artisan serve --host 0.0.0.0 --port {}", p)),
        K::Php => RunStep::new(format!("php -S 0.0.0.0:{}", p)),
        K::Rails => RunStep::new(format!("bundle exec rails server -b 0.0.0.0 -p {}", p)),
        K::Ruby => RunStep::new(format!(
            "ruby {} -o 0.0.0.0 -p {}",
            framework.entry.as_deref().unwrap_or("app.rb"),
            p
        )),
        K::DotNet => {
            let project = framework
                .entry
                .as_deref()
                .map(|e| format!(" --project {}", e))
                .unwrap_or_default();
            RunStep::new(format!("dotnet run{} --urls http://0.0.0.0:{}", project, p))
        }
        K::Flutter => RunStep::new(format!(
            "flutter run -d web-server --web-port {} --web-hostname 0.0.0.0",
            p
        )),
        K::Go => RunStep::new("go run .").env("PORT", &p),
        K::Rust => RunStep::new("cargo run").env("PORT", &p),
        K::StaticHtml => RunStep::new(format!("python3 -m http.server {} --bind 0.0.0.0", p)),
        K::Unknown => match &framework.entry {
            Some(script) => RunStep::new(format!("sh {}", script)).env("PORT", &p),
            None => RunStep::new(format!("python3 -m http.server {} --bind 0.0.0.0", p)),
        },
        // Only reached for a fullstack half that is itself fullstack.
        K::Fullstack => RunStep::new(format!("npx vite --port {} --host 0.0.0.0", p)),
    }
}

fn python_module(framework: &Framework, default: &str) -> String {
    framework
        .entry
        .as_deref()
        .and_then(|e| e.strip_suffix(".py"))
        .unwrap_or(default)
        .replace('/', ".")
}
