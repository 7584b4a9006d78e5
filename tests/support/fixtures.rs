// ABOUTME: Artifact fixtures: small chart and compose bundles built in memory.
// ABOUTME: Bundles are real tar.gz archives so staging runs unmodified.

use flate2::Compression;
use flate2::write::GzEncoder;

use drydock::domain::{Artifact, BackendKind};

/// A gzipped tar archive holding `files` as (path, contents).
pub fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let files: Vec<_> = files.iter().map(|(p, c)| (*p, *c, 0o644)).collect();
    tar_gz_with_modes(&files)
}

/// Like [`tar_gz`], with an explicit mode per entry.
pub fn tar_gz_with_modes(files: &[(&str, &str, u32)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, contents, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// A plain (uncompressed) tar archive.
pub fn tar(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn chart_bundle(version: &str) -> Vec<u8> {
    let chart = format!("apiVersion: v2\nname: web\nversion: 0.1.0\nappVersion: \"{version}\"\n");
    tar_gz(&[
        ("chart/Chart.yaml", chart.as_str()),
        ("chart/templates/deployment.yaml", "kind: Deployment\n"),
    ])
}

pub fn compose_bundle(version: &str) -> Vec<u8> {
    let compose = format!("services:\n  web:\n    image: registry.example.com/web:{version}\n");
    tar_gz(&[("release/docker-compose.yml", compose.as_str())])
}

pub fn helm_artifact(version: &str) -> Artifact {
    Artifact::new(version, BackendKind::Helm, chart_bundle(version))
        .with_side_document("values", "replicaCount: 2\n")
}

pub fn compose_artifact(version: &str) -> Artifact {
    Artifact::new(version, BackendKind::Compose, compose_bundle(version))
        .with_side_document("env", "TAG=latest\n")
}

/// Mark `artifact` as the live one for its kind.
pub fn current(mut artifact: Artifact) -> Artifact {
    artifact.is_current = true;
    artifact
}

/// Mark `artifact` as the rollback target for its kind.
pub fn previous(mut artifact: Artifact) -> Artifact {
    artifact.is_previous = true;
    artifact
}

/// Same bytes, but the recorded checksum no longer matches.
pub fn corrupted(mut artifact: Artifact) -> Artifact {
    artifact.checksum = "0".repeat(64);
    artifact
}
