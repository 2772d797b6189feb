//! Framework descriptors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::templates;

/// Runtime family a framework needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Node,
    Python,
    Java,
    Go,
    Rust,
    Php,
    Ruby,
    DotNet,
    Dart,
    Static,
}

/// Detected technology stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameworkKind {
    Fullstack,
    // Mobile / native
    Flutter,
    Expo,
    ReactNative,
    // Blockchain
    Hardhat,
    Truffle,
    Foundry,
    // Systems languages
    Rust,
    Go,
    // JavaScript
    NextJs,
    Nuxt,
    SvelteKit,
    Astro,
    Remix,
    Angular,
    ReactVite,
    VueVite,
    SvelteVite,
    Vite,
    CreateReactApp,
    NestJs,
    Fastify,
    Express,
    Node,
    // Python
    Django,
    FastApi,
    Flask,
    Streamlit,
    Gradio,
    Python,
    // JVM
    SpringBoot,
    Quarkus,
    Maven,
    Gradle,
    // Others
    Laravel,
    Php,
    Rails,
    Ruby,
    DotNet,
    StaticHtml,
    Unknown,
}

impl FrameworkKind {
    /// Default port the framework's development server listens on.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Fullstack => 5173,
            Self::Flutter => 8080,
            Self::Expo | Self::ReactNative => 8081,
            Self::Hardhat | Self::Truffle | Self::Foundry => 8545,
            Self::Rust | Self::Go => 8080,
            Self::NextJs | Self::Nuxt | Self::Remix | Self::CreateReactApp => 3000,
            Self::SvelteKit | Self::ReactVite | Self::VueVite | Self::SvelteVite | Self::Vite => {
                5173
            }
            Self::Astro => 4321,
            Self::Angular => 4200,
            Self::NestJs | Self::Fastify | Self::Express | Self::Node => 3000,
            Self::Django | Self::FastApi | Self::Python => 8000,
            Self::Flask => 5000,
            Self::Streamlit => 8501,
            Self::Gradio => 7860,
            Self::SpringBoot | Self::Quarkus | Self::Maven | Self::Gradle => 8080,
            Self::Laravel | Self::Php => 8000,
            Self::Rails => 3000,
            Self::Ruby => 4567,
            Self::DotNet => 5000,
            Self::StaticHtml | Self::Unknown => 8080,
        }
    }

    /// Runtime family.
    pub fn runtime(&self) -> Runtime {
        match self {
            Self::Flutter => Runtime::Dart,
            Self::Rust => Runtime::Rust,
            Self::Go => Runtime::Go,
            Self::Django
            | Self::FastApi
            | Self::Flask
            | Self::Streamlit
            | Self::Gradio
            | Self::Python => Runtime::Python,
            Self::SpringBoot | Self::Quarkus | Self::Maven | Self::Gradle => Runtime::Java,
            Self::Laravel | Self::Php => Runtime::Php,
            Self::Rails | Self::Ruby => Runtime::Ruby,
            Self::DotNet => Runtime::DotNet,
            Self::StaticHtml | Self::Unknown => Runtime::Static,
            Self::Fullstack
            | Self::Expo
            | Self::ReactNative
            | Self::Hardhat
            | Self::Truffle
            | Self::Foundry
            | Self::NextJs
            | Self::Nuxt
            | Self::SvelteKit
            | Self::Astro
            | Self::Remix
            | Self::Angular
            | Self::ReactVite
            | Self::VueVite
            | Self::SvelteVite
            | Self::Vite
            | Self::CreateReactApp
            | Self::NestJs
            | Self::Fastify
            | Self::Express
            | Self::Node => Runtime::Node,
        }
    }

    /// Whether the framework serves a browser UI through a dev server with
    /// hot reload.
    pub fn is_frontend(&self) -> bool {
        matches!(
            self,
            Self::NextJs
                | Self::Nuxt
                | Self::SvelteKit
                | Self::Astro
                | Self::Remix
                | Self::Angular
                | Self::ReactVite
                | Self::VueVite
                | Self::SvelteVite
                | Self::Vite
                | Self::CreateReactApp
        )
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Fullstack => "Fullstack (frontend + backend)",
            Self::Flutter => "Flutter",
            Self::Expo => "Expo",
            Self::ReactNative => "React Native",
            Self::Hardhat => "Hardhat",
            Self::Truffle => "Truffle",
            Self::Foundry => "Foundry",
            Self::Rust => "Rust",
            Self::Go => "Go",
            Self::NextJs => "Next.js",
            Self::Nuxt => "Nuxt",
            Self::SvelteKit => "SvelteKit",
            Self::Astro => "Astro",
            Self::Remix => "Remix",
            Self::Angular => "Angular",
            Self::ReactVite => "React (Vite)",
            Self::VueVite => "Vue (Vite)",
            Self::SvelteVite => "Svelte (Vite)",
            Self::Vite => "Vite",
            Self::CreateReactApp => "Create React App",
            Self::NestJs => "NestJS",
            Self::Fastify => "Fastify",
            Self::Express => "Express",
            Self::Node => "Node.js",
            Self::Django => "Django",
            Self::FastApi => "FastAPI",
            Self::Flask => "Flask",
            Self::Streamlit => "Streamlit",
            Self::Gradio => "Gradio",
            Self::Python => "Python",
            Self::SpringBoot => "Spring Boot",
            Self::Quarkus => "Quarkus",
            Self::Maven => "Java (Maven)",
            Self::Gradle => "Java (Gradle)",
            Self::Laravel => "Laravel",
            Self::Php => "PHP",
            Self::Rails => "Ruby on Rails",
            Self::Ruby => "Ruby",
            Self::DotNet => ".NET",
            Self::StaticHtml => "Static HTML",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for FrameworkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// The halves of a fullstack monorepo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullstackParts {
    pub frontend: FrameworkKind,
    pub backend: FrameworkKind,
    pub backend_port: u16,
}

/// Package manager hint for Node projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn install_command(&self) -> &'static str {
        match self {
            Self::Npm => "npm install",
            Self::Yarn => "yarn install",
            Self::Pnpm => "pnpm install",
        }
    }

    pub fn run_script(&self, script: &str) -> String {
        match self {
            Self::Npm => format!("npm run {}", script),
            Self::Yarn => format!("yarn {}", script),
            Self::Pnpm => format!("pnpm {}", script),
        }
    }
}

/// Immutable description of how to build and run a detected stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Framework {
    pub kind: FrameworkKind,
    pub default_port: u16,
    /// Sub-directory to run from, relative to the project root.
    pub working_dir: Option<PathBuf>,
    #[serde(skip)]
    pub dockerfile_template: &'static str,
    #[serde(skip)]
    pub compose_template: Option<&'static str>,
    pub fullstack: Option<FullstackParts>,
    /// Entry point hint (`main.py`, `server.js`, ...).
    pub entry: Option<String>,
    pub package_manager: Option<PackageManager>,
    /// Whether `package.json` defines a `start` script.
    pub has_start_script: bool,
}

impl Framework {
    pub fn new(kind: FrameworkKind) -> Self {
        Self {
            kind,
            default_port: kind.default_port(),
            working_dir: None,
            dockerfile_template: templates::dockerfile_for(kind.runtime()),
            compose_template: None,
            fullstack: None,
            entry: None,
            package_manager: None,
            has_start_script: false,
        }
    }

    pub fn unknown() -> Self {
        Self::new(FrameworkKind::Unknown)
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    pub fn package_manager(mut self, manager: PackageManager) -> Self {
        self.package_manager = Some(manager);
        self
    }

    pub fn start_script(mut self, has_start: bool) -> Self {
        self.has_start_script = has_start;
        self
    }

    pub fn fullstack(mut self, parts: FullstackParts) -> Self {
        self.fullstack = Some(parts);
        self.compose_template = Some(templates::COMPOSE_FULLSTACK);
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.kind == FrameworkKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vite_ports() {
        assert_eq!(FrameworkKind::ReactVite.default_port(), 5173);
        assert_eq!(FrameworkKind::Angular.default_port(), 4200);
        assert_eq!(FrameworkKind::Streamlit.default_port(), 8501);
    }

    #[test]
    fn test_framework_new_uses_runtime_template() {
        let fw = Framework::new(FrameworkKind::Flask);
        assert_eq!(fw.default_port, 5000);
        assert!(fw.dockerfile_template.contains("python"));
        assert!(fw.compose_template.is_none());
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&FrameworkKind::ReactVite).unwrap();
        assert_eq!(json, "\"react-vite\"");
    }
}
