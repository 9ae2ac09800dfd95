use crate::bulk_import::{sample_csv, UploadMode};
use anyhow::Context;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
pub const SAMPLE_BUNDLE_FORMAT: &str = "schoold-student-samples-v1";

#[derive(Debug, Clone)]
pub struct SampleBundleSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

/// Writes both upload templates plus a manifest into one zip.
pub fn export_sample_bundle(out_path: &Path) -> anyhow::Result<SampleBundleSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let modes = [UploadMode::ClassWise, UploadMode::SchoolWide];
    let manifest = json!({
        "format": SAMPLE_BUNDLE_FORMAT,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "files": modes.iter().map(|m| json!({
            "mode": m,
            "fileName": m.sample_file_name(),
            "columns": m.required_headers(),
        })).collect::<Vec<_>>(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    for mode in modes {
        zip.start_file(mode.sample_file_name(), opts)
            .with_context(|| format!("failed to start {}", mode.sample_file_name()))?;
        zip.write_all(sample_csv(mode).as_bytes())
            .with_context(|| format!("failed to write {}", mode.sample_file_name()))?;
    }

    zip.finish().context("failed to finalize sample bundle")?;
    Ok(SampleBundleSummary {
        bundle_format: SAMPLE_BUNDLE_FORMAT.to_string(),
        entry_count: 1 + modes.len(),
    })
}
