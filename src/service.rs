use crate::error::AppError;
use crate::models::{artifact_filename, Status, StatusView, ARTIFACT_CONTENT_TYPE};
use crate::store::JobStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

pub fn get_status(store: &JobStore, id: &str) -> Result<StatusView, AppError> {
    store
        .get(id)
        .map(|job| job.status_view())
        .ok_or(AppError::NotFound)
}

pub fn download(store: &JobStore, id: &str) -> Result<Artifact, AppError> {
    let job = store.get(id).ok_or(AppError::NotFound)?;

    if !job.ready || job.status != Status::Completed {
        return Err(AppError::NotReady);
    }

    // Nothing is rendered, so the payload only identifies the job it belongs to.
    let bytes = format!("mock video data for {}", job.id).into_bytes();

    Ok(Artifact {
        filename: artifact_filename(&job.id),
        content_type: ARTIFACT_CONTENT_TYPE,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationRequest, Job, JobUpdate, OUTPUT_FILE};
    use chrono::Utc;

    fn store_with(id: &str, updates: &[JobUpdate]) -> JobStore {
        let store = JobStore::default();
        let params = GenerationRequest::new("test", 4, 8).validate().unwrap();
        store.put(id, Job::new(id.into(), "test".into(), params, Utc::now()));
        for update in updates {
            store.merge(id, update, Utc::now()).unwrap();
        }
        store
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = JobStore::default();

        assert!(matches!(get_status(&store, "nonexistent"), Err(AppError::NotFound)));
        assert!(matches!(download(&store, "nonexistent"), Err(AppError::NotFound)));
    }

    #[test]
    fn status_projects_the_record() {
        let store = store_with("j", &[JobUpdate::processing(50)]);
        let view = get_status(&store, "j").unwrap();

        assert_eq!(view.job_id, "j");
        assert_eq!(view.status, Status::Processing);
        assert_eq!(view.progress, 50);
        assert!(!view.ready);
        assert!(view.files.is_empty());
    }

    #[test]
    fn download_waits_for_completion() {
        assert!(matches!(download(&store_with("p", &[]), "p"), Err(AppError::NotReady)));

        let processing = store_with("q", &[JobUpdate::processing(75)]);
        assert!(matches!(download(&processing, "q"), Err(AppError::NotReady)));
    }

    #[test]
    fn failed_jobs_cannot_be_downloaded() {
        let store = store_with("f", &[JobUpdate::failed("out of frames")]);

        let view = get_status(&store, "f").unwrap();
        assert_eq!(view.status, Status::Failed);
        assert_eq!(view.error_message.as_deref(), Some("out of frames"));
        assert!(view.completed_at.is_some());

        assert!(matches!(download(&store, "f"), Err(AppError::NotReady)));
    }

    #[test]
    fn completed_download_names_the_job() {
        let store = store_with("done", &[JobUpdate::completed(vec![OUTPUT_FILE.into()])]);
        let artifact = download(&store, "done").unwrap();

        assert_eq!(artifact.filename, "done.mp4");
        assert_eq!(artifact.content_type, "video/mp4");
        assert!(!artifact.bytes.is_empty());
    }
}
