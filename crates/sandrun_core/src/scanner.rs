//! Output line classification.
//!
//! Classification is driven by one table of `(ecosystem, classification,
//! pattern)` rules compiled once. Precedence is port conflict, then error,
//! then ready; a line matching none is normal. Error matches are vetoed by
//! the exclusion list and by context-aware exclusions.

use std::collections::VecDeque;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Lines kept per session.
pub const CONTEXT_CAPACITY: usize = 100;
/// Lines forwarded with an error event.
pub const CONTEXT_WINDOW: usize = 50;

/// Line classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Normal,
    Error,
    PortConflict,
    Ready,
}

/// Tool family a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Node,
    Python,
    Java,
    Go,
    Rust,
    Php,
    Ruby,
    DotNet,
    Dart,
    Docker,
    Network,
    Blockchain,
    Generic,
}

/// One entry of the classification table.
pub struct Rule {
    pub ecosystem: Ecosystem,
    pub classification: Classification,
    pub pattern: Regex,
}

/// Result of classifying one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub classification: Classification,
    /// Ecosystem of the rule that matched.
    pub ecosystem: Option<Ecosystem>,
    /// Conflicting port for `PortConflict`, announced port for `Ready`.
    pub port: Option<u16>,
}

impl ScanResult {
    fn normal() -> Self {
        Self {
            classification: Classification::Normal,
            ecosystem: None,
            port: None,
        }
    }
}

fn compile(patterns: &[(Ecosystem, Classification, &str)]) -> Vec<Rule> {
    patterns
        .iter()
        .map(|(ecosystem, classification, pattern)| Rule {
            ecosystem: *ecosystem,
            classification: *classification,
            pattern: Regex::new(pattern).expect("valid scanner pattern"),
        })
        .collect()
}

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("valid scanner pattern"))
        .collect()
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    use Classification::{Error as E, PortConflict as C, Ready as R};
    use Ecosystem::*;

    compile(&[
        // Port conflicts
        (Node, C, r"EADDRINUSE"),
        (Network, C, r"(?i)address already in use"),
        (Network, C, r"(?i)port \d+ is (already )?in use"),
        (Docker, C, r"(?i)port is already allocated"),
        (Network, C, r"(?i)failed to bind"),
        (Java, C, r"(?i)Port \d+ was already in use"),
        (DotNet, C, r"(?i)Failed to bind to address"),
        (Php, C, r"(?i)Failed to listen on .*(in use|reason: Address)"),
        // Node
        (Node, E, r"npm ERR!"),
        (Node, E, r"Cannot find module"),
        (Node, E, r"Module not found"),
        (Node, E, r"\b(Syntax|Type|Reference|Range)Error\b"),
        (Node, E, r"UnhandledPromiseRejection"),
        (Node, E, r"Failed to compile"),
        (Node, E, r"\[vite\] (Internal server error|Pre-transform error)"),
        (Node, E, r"\berror TS\d+"),
        (Node, E, r"^\s*Error: "),
        // Python
        (Python, E, r"Traceback \(most recent call last\)"),
        (Python, E, r"\b(ModuleNotFound|Import|Indentation|Name|Attribute|Key|Value)Error\b"),
        (Python, E, r"^ERROR:\s"),
        (Python, E, r"django\.core\.exceptions\."),
        // JVM
        (Java, E, r"Exception in thread "),
        (Java, E, r"^\[ERROR\]"),
        (Java, E, r"BUILD FAILURE"),
        (Java, E, r"COMPILATION ERROR"),
        (Java, E, r"APPLICATION FAILED TO START"),
        (Java, E, r"FAILURE: Build failed"),
        // Go
        (Go, E, r"\.go:\d+:\d+: "),
        (Go, E, r"^panic: "),
        (Go, E, r"\bundefined: \w+"),
        // Rust
        (Rust, E, r"error\[E\d{4}\]"),
        (Rust, E, r"^error: "),
        (Rust, E, r"thread '.*' panicked"),
        (Rust, E, r"could not compile"),
        // PHP
        (Php, E, r"PHP (Fatal|Parse) error"),
        (Php, E, r"(Fatal|Parse) error: "),
        (Php, E, r"Uncaught \w+"),
        // Ruby
        (Ruby, E, r"\(\w+Error\)$"),
        (Ruby, E, r"\b(LoadError|NoMethodError|NameError)\b"),
        (Ruby, E, r"Could not find gem"),
        (Ruby, E, r"Gem::MissingSpecError"),
        // .NET
        (DotNet, E, r"error CS\d{4}"),
        (DotNet, E, r"Unhandled exception"),
        (DotNet, E, r"Build FAILED"),
        // Dart
        (Dart, E, r"\.dart:\d+:\d+: Error"),
        (Dart, E, r"Target of URI doesn't exist"),
        (Dart, E, r"Compiler message:"),
        // Docker
        (Docker, E, r"failed to solve"),
        (Docker, E, r"executor failed running"),
        (Docker, E, r"returned a non-zero code"),
        (Docker, E, r"pull access denied"),
        (Docker, E, r"manifest unknown"),
        // Network
        (Network, E, r"ECONNREFUSED|ENOTFOUND|ETIMEDOUT"),
        (Network, E, r"getaddrinfo \w+"),
        // Generic
        (Generic, E, r"(?i)\bcommand not found\b"),
        (Generic, E, r"(?i)segmentation fault"),
        (Generic, E, r"(?i)^fatal\b"),
        (Generic, E, r"(?i)\bunhandled exception\b"),
        // Ready
        (Node, R, r"Local:\s+https?://"),
        (Node, R, r"(?i)ready in \d+"),
        (Node, R, r"(?i)compiled successfully"),
        (Node, R, r"(?i)ready - started server"),
        (Node, R, r"✓ Ready"),
        (Node, R, r"(?i)Angular Live Development Server is listening"),
        (Node, R, r"Nest application successfully started"),
        (Node, R, r"(?i)server (is )?(running|listening|started)"),
        (Node, R, r"(?i)listening on (port )?(https?://)?[\w.:\[\]]*\d{2,5}"),
        (Python, R, r"Uvicorn running on"),
        (Python, R, r"Running on (local URL: )?http"),
        (Python, R, r"Starting development server at"),
        (Python, R, r"Application startup complete"),
        (Python, R, r"You can now view your Streamlit app"),
        (Python, R, r"Serving HTTP on"),
        (Java, R, r"Started \w+ in [\d.]+ seconds"),
        (Java, R, r"(Tomcat|Netty|Jetty) started on port"),
        (Java, R, r"Listening on: http"),
        (Go, R, r"Listening and serving HTTP on"),
        (Go, R, r"http server started on"),
        (Rust, R, r"Rocket has launched"),
        (Php, R, r"Development Server \(http://"),
        (Php, R, r"Server running on \["),
        (Ruby, R, r"Listening on tcp://"),
        (Ruby, R, r"WEBrick::HTTPServer#start"),
        (Ruby, R, r"has taken the stage"),
        (DotNet, R, r"Now listening on:"),
        (Dart, R, r"is being served at"),
        (Blockchain, R, r"Started HTTP and WebSocket JSON-RPC server"),
    ])
});

/// Lines that look like errors but are not.
static EXCLUSIONS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r"(?i)^npm warn",
        r"(?i)\b0 errors?\b",
        r"(?i)\bno errors?\b",
        r"(?i)errors?:\s*0\b",
        r"(?i)found 0 ",
        r"DeprecationWarning",
        r"(?i)^\s*warning:",
        r"(?i)\[vite\] hmr update",
    ])
});

/// Continuation lines of a npm peer-dependency warning block.
static ERESOLVE_CONTINUATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(could not resolve dependency|conflicting peer dependency|while resolving|^\s*(found|peer|from|node_modules/))")
        .expect("valid scanner pattern")
});

/// Errors worth queueing while a fix is already running.
static HIGH_PRIORITY: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile_all(&[
        r"\bSyntaxError\b",
        r"\bIndentationError\b",
        r"ModuleNotFoundError|ImportError",
        r"Cannot find module|Module not found",
        r"\berror TS\d+",
        r"error\[E\d{4}\]",
        r"error CS\d{4}",
        r"(?i)compilation error|failed to compile|could not compile",
        r"Traceback \(most recent call last\)",
        r"Exception in thread|Unhandled exception|UnhandledPromiseRejection",
        r"\b(Reference|Type|Name)Error\b",
        r"^panic: |thread '.*' panicked",
        r"(Fatal|Parse) error: ",
    ])
});

static URL_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s:/]+:(\d{2,5})").expect("valid scanner pattern"));
static WORD_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bport[\s:=]+(\d{2,5})\b").expect("valid scanner pattern"));
static COLON_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":(\d{2,5})\b").expect("valid scanner pattern"));

/// Bounded buffer of the most recent lines of one session.
#[derive(Debug, Clone)]
pub struct RollingContext {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for RollingContext {
    fn default() -> Self {
        Self::new(CONTEXT_CAPACITY)
    }
}

impl RollingContext {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    fn recent(&self, n: usize) -> impl Iterator<Item = &String> + '_ {
        self.lines.iter().rev().take(n)
    }
}

/// Stateless line classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorScanner;

impl ErrorScanner {
    pub fn new() -> Self {
        Self
    }

    /// Classify `line` given the lines that preceded it.
    pub fn inspect(&self, line: &str, context: &RollingContext) -> ScanResult {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return ScanResult::normal();
        }

        let first = |classification: Classification| {
            RULES
                .iter()
                .filter(|r| r.classification == classification)
                .find(|r| r.pattern.is_match(line))
        };

        if let Some(rule) = first(Classification::PortConflict) {
            return ScanResult {
                classification: Classification::PortConflict,
                ecosystem: Some(rule.ecosystem),
                port: conflicting_port(line),
            };
        }

        if let Some(rule) = first(Classification::Error) {
            if !is_excluded(line, context) {
                return ScanResult {
                    classification: Classification::Error,
                    ecosystem: Some(rule.ecosystem),
                    port: None,
                };
            }
        }

        if let Some(rule) = first(Classification::Ready) {
            return ScanResult {
                classification: Classification::Ready,
                ecosystem: Some(rule.ecosystem),
                port: self.extract_port(line),
            };
        }

        ScanResult::normal()
    }

    /// Classification only.
    pub fn scan(&self, line: &str, context: &RollingContext) -> Classification {
        self.inspect(line, context).classification
    }

    /// Port announced on a line (`http://localhost:5173`, `port 3000`).
    pub fn extract_port(&self, line: &str) -> Option<u16> {
        [&*URL_PORT, &*WORD_PORT, &*COLON_PORT]
            .iter()
            .find_map(|re| re.captures(line).and_then(|c| parse_port(&c[1])))
    }

    /// Port named by a conflict line; `None` for any other line.
    pub fn extract_conflicting_port(&self, line: &str) -> Option<u16> {
        let result = self.inspect(line, &RollingContext::new(1));
        match result.classification {
            Classification::PortConflict => result.port,
            _ => None,
        }
    }

    /// Whether an error should be queued while another fix runs.
    pub fn is_high_priority(&self, line: &str) -> bool {
        HIGH_PRIORITY.iter().any(|re| re.is_match(line))
    }

    /// The rule table, for diagnostics.
    pub fn rules(&self) -> &'static [Rule] {
        &RULES
    }
}

fn is_excluded(line: &str, context: &RollingContext) -> bool {
    if EXCLUSIONS.iter().any(|re| re.is_match(line)) {
        return true;
    }
    // npm prints peer-dependency overrides as a multi-line warning block.
    ERESOLVE_CONTINUATION.is_match(line)
        && context
            .recent(10)
            .any(|prev| prev.contains("ERESOLVE overriding peer dependency"))
}

fn conflicting_port(line: &str) -> Option<u16> {
    if let Some(port) = WORD_PORT.captures(line).and_then(|c| parse_port(&c[1])) {
        return Some(port);
    }
    COLON_PORT
        .captures_iter(line)
        .filter_map(|c| parse_port(&c[1]))
        .last()
}

fn parse_port(s: &str) -> Option<u16> {
    s.parse::<u16>().ok().filter(|p| *p > 0)
}
