//! Port substitution in run commands.

use regex::Regex;
use serde::Serialize;
use tracing::warn;

/// How a rewrite was performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteStrategy {
    /// A `--port`, `:N`, `PORT=` or `-p` reference was replaced.
    Contextual,
    /// Every standalone occurrence of the number was replaced.
    Fallback,
    /// The old port does not appear in the command.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRewrite {
    pub command: String,
    pub strategy: RewriteStrategy,
}

/// Contextual patterns; `{}` is the old port.
const CONTEXTUAL: &[&str] = &[
    r"(--port[=\s]+){}\b",
    r"(:){}\b",
    r"(?i)(\bport=){}\b",
    r"((?:^|\s)-p\s+){}\b",
    r"(?i)(\bport[\s=:]+){}\b",
];

/// Replace references to `old` with `new` in `command`.
///
/// Contextual references are replaced first. Only when none exists does
/// the rewrite fall back to replacing the bare number, which is logged.
pub fn rewrite_port(command: &str, old: u16, new: u16) -> PortRewrite {
    let mut rewritten = command.to_string();
    let mut matched = false;

    for template in CONTEXTUAL {
        let pattern = template.replace("{}", &old.to_string());
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        if re.is_match(&rewritten) {
            matched = true;
            rewritten = re
                .replace_all(&rewritten, |caps: &regex::Captures| {
                    format!("{}{}", &caps[1], new)
                })
                .into_owned();
        }
    }

    if matched {
        return PortRewrite {
            command: rewritten,
            strategy: RewriteStrategy::Contextual,
        };
    }

    let bare = format!(r"\b{}\b", old);
    match Regex::new(&bare) {
        Ok(re) if re.is_match(command) => {
            let command_out = re.replace_all(command, new.to_string()).into_owned();
            warn!(
                old,
                new,
                command = %command,
                "No contextual port reference found, replaced bare number"
            );
            PortRewrite {
                command: command_out,
                strategy: RewriteStrategy::Fallback,
            }
        }
        _ => PortRewrite {
            command: command.to_string(),
            strategy: RewriteStrategy::Unchanged,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vite_port_flag() {
        let result = rewrite_port("npx vite --port 5173 --host 0.0.0.0", 5173, 5174);
        assert_eq!(result.command, "npx vite --port 5174 --host 0.0.0.0");
        assert_eq!(result.strategy, RewriteStrategy::Contextual);
    }

    #[test]
    fn test_other_numerals_untouched() {
        let result = rewrite_port(
            "node server-5173.js --port 5173 --workers 51730",
            5173,
            5174,
        );
        assert_eq!(result.command, "node server-5173.js --port 5174 --workers 51730");
    }

    #[test]
    fn test_contextual_forms() {
        assert_eq!(
            rewrite_port("python manage.py runserver 0.0.0.0:8000", 8000, 8001).command,
            "python manage.py runserver 0.0.0.0:8001"
        );
        assert_eq!(
            rewrite_port("PORT=3000 npm start", 3000, 3001).command,
            "PORT=3001 npm start"
        );
        assert_eq!(
            rewrite_port("bundle exec rails server -b 0.0.0.0 -p 3000", 3000, 3002).command,
            "bundle exec rails server -b 0.0.0.0 -p 3002"
        );
        let leading = rewrite_port("-p 3000 --bind 0.0.0.0", 3000, 3001);
        assert_eq!(leading.command, "-p 3001 --bind 0.0.0.0");
        assert_eq!(leading.strategy, RewriteStrategy::Contextual);
        assert_eq!(
            rewrite_port("streamlit run app.py --server.port 8501", 8501, 8502).command,
            "streamlit run app.py --server.port 8502"
        );
        assert_eq!(
            rewrite_port("mvn spring-boot:run -Dspring-boot.run.arguments=--server.port=8080", 8080, 8081)
                .command,
            "mvn spring-boot:run -Dspring-boot.run.arguments=--server.port=8081"
        );
    }

    #[test]
    fn test_fallback_and_unchanged() {
        let fallback = rewrite_port("python3 -m http.server 8080", 8080, 8081);
        assert_eq!(fallback.command, "python3 -m http.server 8081");
        assert_eq!(fallback.strategy, RewriteStrategy::Fallback);

        let unchanged = rewrite_port("npm start", 3000, 3001);
        assert_eq!(unchanged.command, "npm start");
        assert_eq!(unchanged.strategy, RewriteStrategy::Unchanged);
    }
}
