//! Scan command - Classify the lines of a log.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use sandrun_core::{
    Classification, Ecosystem, ErrorScanner, RollingContext, ScanResult, CONTEXT_CAPACITY,
};

#[derive(Args)]
pub struct ScanArgs {
    /// Log file to read (stdin when omitted)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Print one JSON object per finding
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Finding {
    line_number: usize,
    classification: Classification,
    ecosystem: Option<Ecosystem>,
    port: Option<u16>,
    high_priority: bool,
    line: String,
}

pub async fn execute(args: ScanArgs) -> Result<()> {
    let findings = match &args.file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Log file not found: {}", path.display()))?;
            scan_lines(BufReader::new(file)).await?
        }
        None => scan_lines(BufReader::new(tokio::io::stdin())).await?,
    };

    if args.json {
        for finding in &findings {
            println!("{}", serde_json::to_string(finding)?);
        }
        return Ok(());
    }

    for finding in &findings {
        let marker = match finding.classification {
            Classification::Error if finding.high_priority => "❌ error (high)",
            Classification::Error => "❌ error",
            Classification::PortConflict => "⚠️  port conflict",
            Classification::Ready => "✅ ready",
            Classification::Normal => continue,
        };
        match finding.port {
            Some(port) => println!(
                "{:>5}  {} [port {}]  {}",
                finding.line_number, marker, port, finding.line
            ),
            None => println!("{:>5}  {}  {}", finding.line_number, marker, finding.line),
        }
    }

    let errors = findings
        .iter()
        .filter(|f| f.classification == Classification::Error)
        .count();
    println!();
    println!("📋 {} findings, {} errors", findings.len(), errors);
    Ok(())
}

/// Classify every line, keeping the rolling context the orchestrator keeps.
async fn scan_lines<R>(reader: R) -> Result<Vec<Finding>>
where
    R: AsyncBufRead + Unpin,
{
    let scanner = ErrorScanner::new();
    let mut context = RollingContext::new(CONTEXT_CAPACITY);
    let mut findings = Vec::new();
    let mut lines = reader.lines();
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let ScanResult {
            classification,
            ecosystem,
            port,
        } = scanner.inspect(&line, &context);
        if classification != Classification::Normal {
            findings.push(Finding {
                line_number,
                classification,
                ecosystem,
                port,
                high_priority: classification == Classification::Error
                    && scanner.is_high_priority(&line),
                line: line.clone(),
            });
        }
        context.push(line);
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_reports_only_findings() {
        let log = "\
> vite

  VITE v5.0.0  ready in 312 ms
  ➜  Local:   http://localhost:5173/
Error: listen EADDRINUSE: address already in use :::3000
SyntaxError: Unexpected token '<'
";
        let findings = scan_lines(log.as_bytes()).await.unwrap();

        let kinds: Vec<_> = findings.iter().map(|f| f.classification).collect();
        assert!(kinds.contains(&Classification::Ready));
        assert!(kinds.contains(&Classification::PortConflict));
        assert!(kinds.contains(&Classification::Error));
        assert!(!kinds.contains(&Classification::Normal));

        let conflict = findings
            .iter()
            .find(|f| f.classification == Classification::PortConflict)
            .unwrap();
        assert_eq!(conflict.port, Some(3000));
        assert_eq!(conflict.line_number, 5);

        let syntax = findings.last().unwrap();
        assert!(syntax.high_priority);
    }
}
