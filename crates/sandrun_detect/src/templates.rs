//! Build file templates.
//!
//! Templates use `{{variable}}` placeholders. Unknown variables are left in
//! place.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::framework::Runtime;

static VARIABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([a-zA-Z_][a-zA-Z0-9_]*)\}\}").expect("valid pattern"));

/// Substitute `{{name}}` placeholders.
pub fn render(content: &str, variables: &HashMap<&str, String>) -> String {
    VARIABLE_PATTERN
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            variables
                .get(var_name)
                .cloned()
                .unwrap_or_else(|| format!("{{{{{}}}}}", var_name))
        })
        .to_string()
}

pub const DOCKERFILE_NODE: &str = r#"FROM node:20-slim
WORKDIR /app
COPY . .
WORKDIR {{workdir}}
{{setup}}
ENV PORT={{port}}
EXPOSE {{port}}
CMD ["sh", "-c", {{serve}}]
"#;

pub const DOCKERFILE_PYTHON: &str = r#"FROM python:3.12-slim
ENV PYTHONUNBUFFERED=1 PYTHONDONTWRITEBYTECODE=1
WORKDIR /app
COPY . .
WORKDIR {{workdir}}
{{setup}}
ENV PORT={{port}}
EXPOSE {{port}}
CMD ["sh", "-c", {{serve}}]
"#;

pub const DOCKERFILE_JAVA: &str = r#"FROM maven:3.9-eclipse-temurin-21
WORKDIR /app
COPY . .
WORKDIR {{workdir}}
{{setup}}
ENV PORT={{port}}
EXPOSE {{port}}
CMD ["sh", "-c", {{serve}}]
"#;

pub const DOCKERFILE_GO: &str = r#"FROM golang:1.22-alpine
WORKDIR /app
COPY . .
WORKDIR {{workdir}}
{{setup}}
ENV PORT={{port}}
EXPOSE {{port}}
CMD ["sh", "-c", {{serve}}]
"#;

pub const DOCKERFILE_RUST: &str = r#"FROM rust:1.75-slim
WORKDIR /app
COPY . .
WORKDIR {{workdir}}
{{setup}}
ENV PORT={{port}}
EXPOSE {{port}}
CMD ["sh", "-c", {{serve}}]
"#;

pub const DOCKERFILE_PHP: &str = r#"FROM php:8.3-cli
RUN apt-get update && apt-get install -y --no-install-recommends unzip git \
    && rm -rf /var/lib/apt/lists/*
COPY --from=composer:2 /usr/bin/composer /usr/bin/composer
WORKDIR /app
COPY . .
WORKDIR {{workdir}}
{{setup}}
ENV PORT={{port}}
EXPOSE {{port}}
CMD ["sh", "-c", {{serve}}]
"#;

pub const DOCKERFILE_RUBY: &str = r#"FROM ruby:3.3-slim
RUN apt-get update && apt-get install -y --no-install-recommends build-essential \
    && rm -rf /var/lib/apt/lists/*
WORKDIR /app
COPY . .
WORKDIR {{workdir}}
{{setup}}
ENV PORT={{port}}
EXPOSE {{port}}
CMD ["sh", "-c", {{serve}}]
"#;

pub const DOCKERFILE_DOTNET: &str = r#"FROM mcr.microsoft.com/dotnet/sdk:8.0
ENV DOTNET_CLI_TELEMETRY_OPTOUT=1
WORKDIR /app
COPY . .
WORKDIR {{workdir}}
{{setup}}
ENV PORT={{port}}
EXPOSE {{port}}
CMD ["sh", "-c", {{serve}}]
"#;

pub const DOCKERFILE_DART: &str = r#"FROM ghcr.io/cirruslabs/flutter:stable
WORKDIR /app
COPY . .
WORKDIR {{workdir}}
{{setup}}
ENV PORT={{port}}
EXPOSE {{port}}
CMD ["sh", "-c", {{serve}}]
"#;

pub const DOCKERFILE_STATIC: &str = r#"FROM python:3.12-alpine
WORKDIR /app
COPY . .
WORKDIR {{workdir}}
ENV PORT={{port}}
EXPOSE {{port}}
CMD ["sh", "-c", {{serve}}]
"#;

pub const COMPOSE_FULLSTACK: &str = r#"services:
  backend:
    build: ./backend
    ports:
      - "{{backend_port}}:{{backend_port}}"
    environment:
      - PORT={{backend_port}}
  frontend:
    build: ./frontend
    ports:
      - "{{port}}:{{port}}"
    environment:
      - PORT={{port}}
    depends_on:
      - backend
"#;

pub const DOCKERIGNORE: &str = r#".git
node_modules
dist
build
.next
.nuxt
.svelte-kit
target
__pycache__
*.pyc
.venv
venv
.env
.env.*
vendor
bin
obj
.dart_tool
Dockerfile
.dockerignore
"#;

/// Dockerfile template for a runtime family.
pub fn dockerfile_for(runtime: Runtime) -> &'static str {
    match runtime {
        Runtime::Node => DOCKERFILE_NODE,
        Runtime::Python => DOCKERFILE_PYTHON,
        Runtime::Java => DOCKERFILE_JAVA,
        Runtime::Go => DOCKERFILE_GO,
        Runtime::Rust => DOCKERFILE_RUST,
        Runtime::Php => DOCKERFILE_PHP,
        Runtime::Ruby => DOCKERFILE_RUBY,
        Runtime::DotNet => DOCKERFILE_DOTNET,
        Runtime::Dart => DOCKERFILE_DART,
        Runtime::Static => DOCKERFILE_STATIC,
    }
}
