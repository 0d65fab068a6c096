use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

const MODELS_DIR: &str = "models";
const HANDPOSE_FILE: &str = "handpose_estimation_mediapipe_2023feb.onnx";
const HANDPOSE_URL: &str = "https://raw.githubusercontent.com/214zzl995/gesture-universe/refs/heads/main/models/handpose_estimation_mediapipe_2023feb.onnx";
const CLASSIFIER_FILE: &str = "hand_recognition_model.onnx";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    HandposeEstimator,
    GestureClassifier,
}

impl ModelKind {
    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::HandposeEstimator => "handpose estimator",
            ModelKind::GestureClassifier => "gesture classifier",
        }
    }
}

pub fn default_handpose_model_path() -> PathBuf {
    Path::new(MODELS_DIR).join(HANDPOSE_FILE)
}

pub fn default_classifier_model_path() -> PathBuf {
    Path::new(MODELS_DIR).join(CLASSIFIER_FILE)
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModelDownloadEvent {
    AlreadyPresent { model: ModelKind },
    Started { model: ModelKind, total: Option<u64> },
    Progress { model: ModelKind, downloaded: u64 },
    Finished { model: ModelKind },
}

/// Fetches the public handpose estimator into `model_path` if it is missing.
pub fn ensure_handpose_model_ready<F>(model_path: &Path, mut on_event: F) -> Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    let model = ModelKind::HandposeEstimator;
    if model_path.is_file() {
        on_event(ModelDownloadEvent::AlreadyPresent { model });
        return Ok(());
    }

    let mut bar = None;
    fetch(model, HANDPOSE_URL, model_path, &mut |event: ModelDownloadEvent| {
        match event {
            ModelDownloadEvent::Started { total, .. } => bar = Some(progress_bar(total)),
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(b) = &bar {
                    b.set_position(downloaded);
                }
            }
            ModelDownloadEvent::Finished { .. } => {
                if let Some(b) = bar.take() {
                    b.finish_with_message(format!("{} ready", model.label()));
                }
            }
            ModelDownloadEvent::AlreadyPresent { .. } => {}
        }
        on_event(event);
    })
}

/// The trained classifier ships with the deployment and is never fetched.
pub fn ensure_classifier_model_present(model_path: &Path) -> Result<()> {
    if !model_path.is_file() {
        bail!(
            "{} model not found at {}",
            ModelKind::GestureClassifier.label(),
            model_path.display()
        );
    }
    Ok(())
}

/// Streams `url` into a sibling `.download` file, then renames it over
/// `dest` so a partial download never looks like a model.
fn fetch(
    model: ModelKind,
    url: &str,
    dest: &Path,
    on_event: &mut dyn FnMut(ModelDownloadEvent),
) -> Result<()> {
    if let Some(dir) = dest.parent() {
        fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }
    log::info!("fetching {} from {url}", model.label());

    let response = Client::new()
        .get(url)
        .send()
        .and_then(|resp| resp.error_for_status())
        .with_context(|| format!("download of {} failed", model.label()))?;
    on_event(ModelDownloadEvent::Started {
        model,
        total: response.content_length(),
    });

    let partial = dest.with_extension("download");
    let mut file = File::create(&partial).with_context(|| format!("cannot create {}", partial.display()))?;
    let mut reader = Progress {
        inner: response,
        read: 0,
        on_read: |downloaded| on_event(ModelDownloadEvent::Progress { model, downloaded }),
    };
    io::copy(&mut reader, &mut file).context("model download interrupted")?;
    file.flush()?;
    file.sync_all()?;
    drop(reader);

    fs::rename(&partial, dest)
        .with_context(|| format!("cannot move {} to {}", partial.display(), dest.display()))?;
    on_event(ModelDownloadEvent::Finished { model });
    Ok(())
}

/// Reports the running byte count after every read.
struct Progress<R, F> {
    inner: R,
    read: u64,
    on_read: F,
}

impl<R: Read, F: FnMut(u64)> Read for Progress<R, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.read += n as u64;
            (self.on_read)(self.read);
        }
        Ok(n)
    }
}

fn progress_bar(total: Option<u64>) -> ProgressBar {
    let Some(total) = total.filter(|&t| t > 0) else {
        let spinner = ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner:.green} {bytes} downloaded")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        return spinner;
    };
    ProgressBar::new(total).with_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_handpose_model_is_left_alone() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut events = Vec::new();
        ensure_handpose_model_ready(file.path(), |evt| events.push(evt)).unwrap();
        assert_eq!(
            events,
            vec![ModelDownloadEvent::AlreadyPresent {
                model: ModelKind::HandposeEstimator
            }]
        );
    }

    #[test]
    fn classifier_must_be_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ensure_classifier_model_present(&dir.path().join("nope.onnx")).unwrap_err();
        assert!(err.to_string().contains("gesture classifier"));
        assert!(ensure_classifier_model_present(dir.path()).is_err());

        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(ensure_classifier_model_present(file.path()).is_ok());
    }

    #[test]
    fn progress_reader_counts_bytes() {
        let mut seen = Vec::new();
        let mut reader = Progress {
            inner: io::Cursor::new(vec![7u8; 10]),
            read: 0,
            on_read: |n: u64| seen.push(n),
        };
        let mut buf = [0u8; 4];
        while reader.read(&mut buf).unwrap() > 0 {}
        drop(reader);
        assert_eq!(seen, vec![4, 8, 10]);
    }

    #[test]
    fn default_paths_live_under_models() {
        assert!(default_handpose_model_path().starts_with(MODELS_DIR));
        assert_eq!(
            default_classifier_model_path().file_name().and_then(|n| n.to_str()),
            Some(CLASSIFIER_FILE)
        );
    }
}
