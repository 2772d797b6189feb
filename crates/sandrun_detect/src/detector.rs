//! Framework detection from project manifests.
//!
//! Detection runs in a fixed priority order: fullstack monorepo, mobile,
//! blockchain, language manifests, a nested frontend-only directory, static
//! HTML, and finally `Unknown`. It only reads files and never fails.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::framework::{Framework, FrameworkKind, FullstackParts, PackageManager};

/// Files that mark a directory as a real backend.
const BACKEND_MARKERS: &[&str] = &[
    "requirements.txt",
    "pyproject.toml",
    "Pipfile",
    "main.py",
    "app.py",
    "manage.py",
    "package.json",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "go.mod",
    "Cargo.toml",
    "composer.json",
    "Gemfile",
];

const PYTHON_ENTRIES: &[&str] = &["main.py", "app.py", "server.py", "run.py", "wsgi.py"];
const NODE_ENTRIES: &[&str] = &["server.js", "index.js", "app.js", "main.js", "src/index.js"];

/// Parsed view of a `package.json`.
#[derive(Debug, Default)]
struct PackageJson {
    dependencies: HashSet<String>,
    main: Option<String>,
    has_start_script: bool,
}

impl PackageJson {
    fn read(dir: &Path) -> Option<Self> {
        let path = dir.join("package.json");
        let content = fs::read_to_string(&path).ok()?;
        let value: Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!("Unparseable {}: {}", path.display(), e);
                return Some(Self::default());
            }
        };

        let mut dependencies = HashSet::new();
        for section in ["dependencies", "devDependencies", "peerDependencies"] {
            if let Some(map) = value.get(section).and_then(Value::as_object) {
                dependencies.extend(map.keys().cloned());
            }
        }

        Some(Self {
            dependencies,
            main: value.get("main").and_then(Value::as_str).map(str::to_string),
            has_start_script: value
                .get("scripts")
                .and_then(|s| s.get("start"))
                .is_some(),
        })
    }

    fn has(&self, name: &str) -> bool {
        self.dependencies.contains(name)
    }
}

/// Infers a [`Framework`] from a project directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameworkDetector;

impl FrameworkDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect the framework of the project at `project`.
    pub fn detect(&self, project: &Path) -> Framework {
        if !project.is_dir() {
            warn!("Project directory does not exist: {}", project.display());
            return Framework::unknown();
        }

        let framework = self
            .detect_fullstack(project)
            .or_else(|| self.detect_mobile(project))
            .or_else(|| self.detect_blockchain(project))
            .or_else(|| self.detect_manifests(project))
            .or_else(|| self.detect_frontend_only(project))
            .or_else(|| self.detect_static(project))
            .unwrap_or_else(|| self.fallback(project));

        info!(
            "Detected {} (port {}) in {}",
            framework.kind,
            framework.default_port,
            project.display()
        );
        framework
    }

    fn detect_fullstack(&self, project: &Path) -> Option<Framework> {
        let frontend_dir = project.join("frontend");
        let backend_dir = project.join("backend");
        if !frontend_dir.is_dir() || !has_backend_files(&backend_dir) {
            return None;
        }
        if !frontend_dir.join("package.json").is_file() && !frontend_dir.join("index.html").is_file()
        {
            return None;
        }

        let frontend = self
            .detect_node(&frontend_dir)
            .or_else(|| self.detect_static(&frontend_dir))?;
        let backend = self.detect_manifests(&backend_dir)?;

        let mut backend_port = backend.default_port;
        if backend_port == frontend.default_port {
            backend_port += 1;
        }
        debug!(
            "Fullstack project: frontend {} / backend {}",
            frontend.kind, backend.kind
        );

        let mut framework = Framework::new(FrameworkKind::Fullstack).fullstack(FullstackParts {
            frontend: frontend.kind,
            backend: backend.kind,
            backend_port,
        });
        framework.default_port = frontend.default_port;
        framework.package_manager = frontend.package_manager;
        framework.entry = backend.entry;
        Some(framework)
    }

    fn detect_mobile(&self, project: &Path) -> Option<Framework> {
        if let Ok(pubspec) = fs::read_to_string(project.join("pubspec.yaml")) {
            if pubspec.contains("flutter") {
                return Some(Framework::new(FrameworkKind::Flutter));
            }
        }

        let pkg = PackageJson::read(project)?;
        let kind = if pkg.has("expo") {
            FrameworkKind::Expo
        } else if pkg.has("react-native") {
            FrameworkKind::ReactNative
        } else {
            return None;
        };
        Some(Framework::new(kind).package_manager(package_manager(project)))
    }

    fn detect_blockchain(&self, project: &Path) -> Option<Framework> {
        let kind = if ["hardhat.config.js", "hardhat.config.ts", "hardhat.config.cjs"]
            .iter()
            .any(|f| project.join(f).is_file())
        {
            FrameworkKind::Hardhat
        } else if ["truffle-config.js", "truffle.js"]
            .iter()
            .any(|f| project.join(f).is_file())
        {
            FrameworkKind::Truffle
        } else if project.join("foundry.toml").is_file() {
            FrameworkKind::Foundry
        } else {
            return None;
        };
        Some(Framework::new(kind).package_manager(package_manager(project)))
    }

    /// Language-specific manifests at the top of `dir`.
    fn detect_manifests(&self, dir: &Path) -> Option<Framework> {
        if dir.join("Cargo.toml").is_file() {
            return Some(Framework::new(FrameworkKind::Rust));
        }
        if dir.join("go.mod").is_file() {
            return Some(Framework::new(FrameworkKind::Go));
        }
        self.detect_node(dir)
            .or_else(|| self.detect_python(dir))
            .or_else(|| self.detect_jvm(dir))
            .or_else(|| self.detect_php(dir))
            .or_else(|| self.detect_ruby(dir))
            .or_else(|| self.detect_dotnet(dir))
    }

    fn detect_node(&self, dir: &Path) -> Option<Framework> {
        let pkg = PackageJson::read(dir)?;

        let kind = if pkg.has("next") {
            FrameworkKind::NextJs
        } else if pkg.has("nuxt") || pkg.has("nuxt3") {
            FrameworkKind::Nuxt
        } else if pkg.has("@sveltejs/kit") {
            FrameworkKind::SvelteKit
        } else if pkg.has("astro") {
            FrameworkKind::Astro
        } else if pkg.has("@remix-run/react") || pkg.has("@remix-run/dev") {
            FrameworkKind::Remix
        } else if pkg.has("@angular/core") {
            FrameworkKind::Angular
        } else if pkg.has("vite") && pkg.has("react") {
            FrameworkKind::ReactVite
        } else if pkg.has("vite") && pkg.has("vue") {
            FrameworkKind::VueVite
        } else if pkg.has("vite") && pkg.has("svelte") {
            FrameworkKind::SvelteVite
        } else if pkg.has("vite") {
            FrameworkKind::Vite
        } else if pkg.has("react-scripts") {
            FrameworkKind::CreateReactApp
        } else if pkg.has("@nestjs/core") {
            FrameworkKind::NestJs
        } else if pkg.has("fastify") {
            FrameworkKind::Fastify
        } else if pkg.has("express") {
            FrameworkKind::Express
        } else {
            FrameworkKind::Node
        };

        let mut framework = Framework::new(kind)
            .package_manager(package_manager(dir))
            .start_script(pkg.has_start_script);
        let entry = pkg
            .main
            .filter(|main| dir.join(main).is_file())
            .or_else(|| first_existing(dir, NODE_ENTRIES));
        if let Some(entry) = entry {
            framework = framework.entry(entry);
        }
        Some(framework)
    }

    fn detect_python(&self, dir: &Path) -> Option<Framework> {
        let manifests: String = ["requirements.txt", "pyproject.toml", "Pipfile", "setup.py"]
            .iter()
            .filter_map(|f| fs::read_to_string(dir.join(f)).ok())
            .collect::<Vec<_>>()
            .join("\n")
            .to_lowercase();
        let entry = first_existing(dir, PYTHON_ENTRIES);
        let has_manage = dir.join("manage.py").is_file();

        if manifests.is_empty() && entry.is_none() && !has_manage {
            return None;
        }

        let kind = if has_manage || manifests.contains("django") {
            FrameworkKind::Django
        } else if manifests.contains("fastapi") {
            FrameworkKind::FastApi
        } else if manifests.contains("streamlit") {
            FrameworkKind::Streamlit
        } else if manifests.contains("gradio") {
            FrameworkKind::Gradio
        } else if manifests.contains("flask") {
            FrameworkKind::Flask
        } else {
            FrameworkKind::Python
        };

        let mut framework = Framework::new(kind);
        if let Some(entry) = entry {
            framework = framework.entry(entry);
        }
        Some(framework)
    }

    fn detect_jvm(&self, dir: &Path) -> Option<Framework> {
        if let Ok(pom) = fs::read_to_string(dir.join("pom.xml")) {
            let kind = if pom.contains("quarkus") {
                FrameworkKind::Quarkus
            } else if pom.contains("spring-boot") {
                FrameworkKind::SpringBoot
            } else {
                FrameworkKind::Maven
            };
            return Some(Framework::new(kind));
        }

        let gradle = fs::read_to_string(dir.join("build.gradle"))
            .or_else(|_| fs::read_to_string(dir.join("build.gradle.kts")))
            .ok()?;
        let task = if gradle.contains("org.springframework.boot") {
            "bootRun"
        } else {
            "run"
        };
        Some(Framework::new(FrameworkKind::Gradle).entry(task))
    }

    fn detect_php(&self, dir: &Path) -> Option<Framework> {
        let composer = fs::read_to_string(dir.join("composer.json")).ok();
        if dir.join("artisan").is_file()
            || composer
                .as_deref()
                .is_some_and(|c| c.contains("laravel/framework"))
        {
            return Some(Framework::new(FrameworkKind::Laravel));
        }
        if composer.is_some() || dir.join("index.php").is_file() {
            return Some(Framework::new(FrameworkKind::Php));
        }
        None
    }

    fn detect_ruby(&self, dir: &Path) -> Option<Framework> {
        let gemfile = fs::read_to_string(dir.join("Gemfile")).ok()?;
        if gemfile.contains("rails") {
            return Some(Framework::new(FrameworkKind::Rails));
        }
        let mut framework = Framework::new(FrameworkKind::Ruby);
        if let Some(entry) = first_existing(dir, &["app.rb", "server.rb", "main.rb"]) {
            framework = framework.entry(entry);
        }
        Some(framework)
    }

    fn detect_dotnet(&self, dir: &Path) -> Option<Framework> {
        let project = find_by_extension(dir, "csproj", 2)?;
        let relative = project
            .strip_prefix(dir)
            .unwrap_or(&project)
            .to_string_lossy()
            .replace('\\', "/");
        Some(Framework::new(FrameworkKind::DotNet).entry(relative))
    }

    /// A `frontend/` directory with no real backend next to it.
    fn detect_frontend_only(&self, project: &Path) -> Option<Framework> {
        let frontend_dir = project.join("frontend");
        if !frontend_dir.is_dir() || has_backend_files(&project.join("backend")) {
            return None;
        }
        let framework = self
            .detect_node(&frontend_dir)
            .or_else(|| self.detect_static(&frontend_dir))?;
        debug!("Frontend-only project, running from frontend/");
        Some(framework.working_dir("frontend"))
    }

    fn detect_static(&self, dir: &Path) -> Option<Framework> {
        if dir.join("index.html").is_file() {
            return Some(Framework::new(FrameworkKind::StaticHtml));
        }
        let index = WalkDir::new(dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(Result::ok)
            .find(|e| e.file_type().is_file() && e.file_name() == "index.html")?;
        let parent = index.path().parent()?.strip_prefix(dir).ok()?.to_path_buf();
        Some(Framework::new(FrameworkKind::StaticHtml).working_dir(parent))
    }

    fn fallback(&self, project: &Path) -> Framework {
        let mut framework = Framework::unknown();
        if let Some(script) = first_existing(project, &["start.sh", "run.sh"]) {
            framework = framework.entry(script);
        }
        framework
    }
}

fn has_backend_files(dir: &Path) -> bool {
    dir.is_dir()
        && (BACKEND_MARKERS.iter().any(|f| dir.join(f).is_file())
            || find_by_extension(dir, "csproj", 1).is_some())
}

fn package_manager(dir: &Path) -> PackageManager {
    if dir.join("pnpm-lock.yaml").is_file() {
        PackageManager::Pnpm
    } else if dir.join("yarn.lock").is_file() {
        PackageManager::Yarn
    } else {
        PackageManager::Npm
    }
}

fn first_existing(dir: &Path, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find(|c| dir.join(c).is_file())
        .map(|c| c.to_string())
}

fn find_by_extension(dir: &Path, extension: &str, max_depth: usize) -> Option<PathBuf> {
    WalkDir::new(dir)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|e| {
            e.file_type().is_file()
                && e.path().extension().is_some_and(|ext| ext == extension)
        })
        .map(|e| e.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_react_vite() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "package.json",
            r#"{"dependencies": {"react": "^18.2.0"}, "devDependencies": {"vite": "^5.0.0"}}"#,
        );

        let fw = FrameworkDetector::new().detect(dir.path());
        assert_eq!(fw.kind, FrameworkKind::ReactVite);
        assert_eq!(fw.default_port, 5173);
        assert!(fw.working_dir.is_none());
    }

    #[test]
    fn test_fullstack_requires_real_backend() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "frontend/package.json", r#"{"dependencies": {"vite": "5", "vue": "3"}}"#);
        fs::create_dir_all(dir.path().join("backend")).unwrap();
        write(dir.path(), "backend/README.md", "empty");

        let fw = FrameworkDetector::new().detect(dir.path());
        assert_eq!(fw.kind, FrameworkKind::VueVite);
        assert_eq!(fw.working_dir, Some(PathBuf::from("frontend")));
    }

    #[test]
    fn test_fullstack_pair() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "frontend/package.json", r#"{"dependencies": {"vite": "5", "react": "18"}}"#);
        write(dir.path(), "backend/requirements.txt", "fastapi\nuvicorn\n");
        write(dir.path(), "backend/main.py", "app = None\n");

        let fw = FrameworkDetector::new().detect(dir.path());
        assert_eq!(fw.kind, FrameworkKind::Fullstack);
        let parts = fw.fullstack.unwrap();
        assert_eq!(parts.frontend, FrameworkKind::ReactVite);
        assert_eq!(parts.backend, FrameworkKind::FastApi);
        assert_eq!(parts.backend_port, 8000);
        assert!(fw.compose_template.is_some());
    }

    #[test]
    fn test_mobile_before_node() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", r#"{"dependencies": {"expo": "50", "react": "18"}}"#);

        let fw = FrameworkDetector::new().detect(dir.path());
        assert_eq!(fw.kind, FrameworkKind::Expo);
    }

    #[test]
    fn test_blockchain_before_node() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", r#"{"devDependencies": {"hardhat": "2"}}"#);
        write(dir.path(), "hardhat.config.js", "module.exports = {};");

        let fw = FrameworkDetector::new().detect(dir.path());
        assert_eq!(fw.kind, FrameworkKind::Hardhat);
        assert_eq!(fw.default_port, 8545);
    }

    #[test]
    fn test_python_keyword_sniffing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "requirements.txt", "Flask==3.0.0\n");
        write(dir.path(), "app.py", "");

        let fw = FrameworkDetector::new().detect(dir.path());
        assert_eq!(fw.kind, FrameworkKind::Flask);
        assert_eq!(fw.entry.as_deref(), Some("app.py"));
    }

    #[test]
    fn test_spring_boot() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "pom.xml",
            "<project><parent><artifactId>spring-boot-starter-parent</artifactId></parent></project>",
        );

        let fw = FrameworkDetector::new().detect(dir.path());
        assert_eq!(fw.kind, FrameworkKind::SpringBoot);
        assert_eq!(fw.default_port, 8080);
    }

    #[test]
    fn test_dotnet_nested_csproj() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Api/Api.csproj", "<Project Sdk=\"Microsoft.NET.Sdk.Web\"></Project>");

        let fw = FrameworkDetector::new().detect(dir.path());
        assert_eq!(fw.kind, FrameworkKind::DotNet);
        assert_eq!(fw.entry.as_deref(), Some("Api/Api.csproj"));
    }

    #[test]
    fn test_static_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "<html></html>");
        assert_eq!(
            FrameworkDetector::new().detect(dir.path()).kind,
            FrameworkKind::StaticHtml
        );

        let empty = tempfile::tempdir().unwrap();
        let fw = FrameworkDetector::new().detect(empty.path());
        assert!(fw.is_unknown());
        assert_eq!(fw.default_port, 8080);
    }

    #[test]
    fn test_missing_directory_is_unknown() {
        let fw = FrameworkDetector::new().detect(Path::new("/nonexistent/sandrun/project"));
        assert!(fw.is_unknown());
    }

    #[test]
    fn test_malformed_package_json_is_node() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", "{ not json");

        let fw = FrameworkDetector::new().detect(dir.path());
        assert_eq!(fw.kind, FrameworkKind::Node);
    }
}
