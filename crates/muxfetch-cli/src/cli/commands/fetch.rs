//! `muxfetch fetch` – fetch URLs through one multiplexer and report each result.

use anyhow::{bail, Context, Result};
use muxfetch_core::config::MuxConfig;
use muxfetch_core::{FetchError, FetchResult, MuxStats, RequestMultiplexer, Resource};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Outcome of one command-line request.
#[derive(Debug, Serialize)]
struct FetchReport {
    url: String,
    status: Option<u32>,
    bytes: usize,
    sha256: Option<String>,
    etag: Option<String>,
    error: Option<String>,
}

impl FetchReport {
    fn new(url: &str, result: &FetchResult) -> Self {
        match result {
            Ok(resp) => Self {
                url: url.to_string(),
                status: Some(resp.status),
                bytes: resp.data.len(),
                sha256: Some(hex::encode(Sha256::digest(&*resp.data))),
                etag: resp.etag.clone(),
                error: None,
            },
            Err(err) => Self {
                url: url.to_string(),
                status: None,
                bytes: 0,
                sha256: None,
                etag: None,
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Summary<'a> {
    results: &'a [FetchReport],
    stats: &'a MuxStats,
}

/// Only http and https are accepted. The key is the string as given, not the
/// normalized form, so the multiplexer sees exactly what the user typed.
fn parse_resource(raw: &str) -> Result<Resource> {
    let parsed = url::Url::parse(raw).with_context(|| format!("invalid URL: {raw}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(Resource::new(raw)),
        other => bail!("unsupported scheme {other:?} in {raw}"),
    }
}

pub async fn run_fetch(cfg: &MuxConfig, urls: &[String], json: bool) -> Result<()> {
    let resources = urls
        .iter()
        .map(|u| parse_resource(u))
        .collect::<Result<Vec<_>>>()?;

    let mux = RequestMultiplexer::with_curl(cfg)?;
    let pending: Vec<_> = resources.iter().map(|r| mux.fetch(r)).collect();

    let mut reports = Vec::with_capacity(pending.len());
    for (resource, (handle, rx)) in resources.iter().zip(pending) {
        let result = rx.await.unwrap_or_else(|_| {
            Err(FetchError::Transport("request dropped before completion".to_string()))
        });
        drop(handle);
        if let Err(err) = &result {
            tracing::warn!(url = %resource.url, "fetch failed: {}", err);
        }
        reports.push(FetchReport::new(&resource.url, &result));
    }
    let stats = mux.stats();

    if json {
        let summary = Summary {
            results: &reports,
            stats: &stats,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_table(&reports, &stats);
    }

    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        bail!("{failed} of {} requests failed", reports.len());
    }
    Ok(())
}

fn print_table(reports: &[FetchReport], stats: &MuxStats) {
    println!("{:<6} {:<10} {:<16} {}", "STATUS", "BYTES", "SHA256", "URL");
    for r in reports {
        let status = r
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let digest = r.sha256.as_deref().map(|d| &d[..16]).unwrap_or("-");
        println!("{:<6} {:<10} {:<16} {}", status, r.bytes, digest, r.url);
        if let Some(err) = &r.error {
            println!("       error: {err}");
        }
    }
    println!(
        "requests={} coalesced={} transfers={} ({:.0}% coalesced)",
        stats.requests,
        stats.coalesced,
        stats.transports_started,
        stats.coalescing_ratio() * 100.0
    );
}
