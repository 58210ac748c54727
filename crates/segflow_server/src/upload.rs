use axum::extract::Multipart;
use axum::extract::multipart::Field;
use segflow_core::archive;
use segflow_core::case::{ImageFormat, first_image, staged_name};
use segflow_core::cleanup::ScratchDir;
use segflow_core::error::JobError;
use segflow_core::job::UploadParams;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const STORAGE_PREFIX: &str = "segflow_job_";

/// Temporary storage of an uploaded case: `<root>/in` holds the staged input,
/// `<root>/out` receives the prediction.
#[derive(Debug)]
pub struct StagedUpload {
    pub storage: ScratchDir,
    pub in_dir: PathBuf,
    pub out_dir: PathBuf,
    pub params: UploadParams,
}

/// Reads the multipart form of an upload and stages its file.
///
/// The `file` field is either a `.tar.gz`/`.tgz` archive, extracted into
/// `in/`, or a single `.nii`/`.nii.gz` image, stored as `in/case_0000<ext>`.
pub async fn stage_upload(
    mut multipart: Multipart,
    parent: Option<&Path>,
) -> Result<StagedUpload, JobError> {
    let storage = ScratchDir::create(STORAGE_PREFIX, parent)
        .map_err(|e| JobError::System(format!("Cannot create job storage: {e}")))?;
    let in_dir = storage.path().join("in");
    let out_dir = storage.path().join("out");
    for dir in [&in_dir, &out_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| JobError::System(format!("Cannot create {}: {e}", dir.display())))?;
    }

    let mut params = UploadParams::default();
    let mut dataset = None;
    let mut upload = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "file" => upload = Some(save_field(field, storage.path()).await?),
            "dataset" => dataset = non_empty(field.text().await.map_err(invalid)?),
            "config" => {
                if let Some(config) = non_empty(field.text().await.map_err(invalid)?) {
                    params.config = config;
                }
            }
            "folds" => {
                if let Some(folds) = non_empty(field.text().await.map_err(invalid)?) {
                    params.folds = folds;
                }
            }
            "image_id" => params.image_id = non_empty(field.text().await.map_err(invalid)?),
            "date" => params.date = non_empty(field.text().await.map_err(invalid)?),
            other => debug!("Ignoring upload field {other}"),
        }
    }

    params.dataset =
        dataset.ok_or_else(|| JobError::InvalidUpload("missing `dataset` field".into()))?;
    let (file_name, path) =
        upload.ok_or_else(|| JobError::InvalidUpload("missing `file` field".into()))?;

    if archive::is_archive_name(&file_name) {
        let (archive_path, target) = (path.clone(), in_dir.clone());
        tokio::task::spawn_blocking(move || archive::unpack(&archive_path, &target))
            .await
            .map_err(|e| JobError::System(e.to_string()))?
            .map_err(|e| JobError::InvalidUpload(format!("cannot extract {file_name}: {e}")))?;

        let has_image = first_image(&in_dir)
            .map_err(|e| JobError::System(e.to_string()))?
            .is_some();
        if !has_image {
            return Err(JobError::InvalidUpload(format!(
                "{file_name} contains no .nii/.nii.gz images"
            )));
        }
    } else if let Some(format) = ImageFormat::from_name(&file_name) {
        tokio::fs::rename(&path, in_dir.join(staged_name(0, format)))
            .await
            .map_err(|e| JobError::System(e.to_string()))?;
    } else {
        return Err(JobError::InvalidUpload(format!(
            "unsupported file type: {file_name}"
        )));
    }

    Ok(StagedUpload {
        storage,
        in_dir,
        out_dir,
        params,
    })
}

/// Streams the `file` field into `root`, returning its client-side name and local path.
async fn save_field(mut field: Field<'_>, root: &Path) -> Result<(String, PathBuf), JobError> {
    let file_name = field
        .file_name()
        .and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.bin".to_string());
    let path = root.join(format!("upload_{file_name}"));

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| JobError::System(e.to_string()))?;
    while let Some(chunk) = field.chunk().await.map_err(invalid)? {
        file.write_all(&chunk)
            .await
            .map_err(|e| JobError::System(e.to_string()))?;
    }
    file.flush()
        .await
        .map_err(|e| JobError::System(e.to_string()))?;

    Ok((file_name, path))
}

fn invalid(e: impl std::fmt::Display) -> JobError {
    JobError::InvalidUpload(e.to_string())
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
