use super::report::CheckOutcome;
use crate::camera::{CameraCapability, ImageBytes, ImageMetadata, MIME_JPEG};
use crate::error::CallError;
use crate::poll::PollSettings;
use std::future::Future;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

pub const GET_IMAGE: &str = "GetImage";
pub const GET_IMAGES: &str = "GetImages";
pub const GET_PROPERTIES: &str = "GetProperties";

/// Run the three capability checks in order, all bounded by `deadline`
pub async fn run_checks<C>(camera: &C, poll: PollSettings, deadline: Instant) -> Vec<CheckOutcome>
where
    C: CameraCapability + ?Sized,
{
    vec![
        check_image(camera, poll, deadline).await,
        check_images(camera, poll, deadline).await,
        check_properties(camera, deadline).await,
    ]
}

/// Poll `fetch_image` until it returns a non-empty image
pub async fn check_image<C>(camera: &C, poll: PollSettings, deadline: Instant) -> CheckOutcome
where
    C: CameraCapability + ?Sized,
{
    async {
        let Some(poll) = bounded(poll, deadline) else {
            return out_of_time(GET_IMAGE);
        };
        let outcome = poll
            .poll(
                || within(deadline, camera.fetch_image(MIME_JPEG)),
                |image: &ImageBytes| !image.is_empty(),
            )
            .await;
        log_outcome(CheckOutcome::from_poll(GET_IMAGE, outcome))
    }
    .instrument(info_span!("check", name = GET_IMAGE))
    .await
}

/// Poll `fetch_images` until every returned image is non-empty
pub async fn check_images<C>(camera: &C, poll: PollSettings, deadline: Instant) -> CheckOutcome
where
    C: CameraCapability + ?Sized,
{
    async {
        let Some(poll) = bounded(poll, deadline) else {
            return out_of_time(GET_IMAGES);
        };
        let outcome = poll
            .poll(
                || within(deadline, camera.fetch_images()),
                |(images, _): &(Vec<ImageBytes>, ImageMetadata)| {
                    !images.is_empty() && images.iter().all(|i| !i.is_empty())
                },
            )
            .await;
        log_outcome(CheckOutcome::from_poll(GET_IMAGES, outcome))
    }
    .instrument(info_span!("check", name = GET_IMAGES))
    .await
}

/// Static driver metadata must be available on the first call
pub async fn check_properties<C>(camera: &C, deadline: Instant) -> CheckOutcome
where
    C: CameraCapability + ?Sized,
{
    async {
        if Instant::now() >= deadline {
            return out_of_time(GET_PROPERTIES);
        }
        let started = Instant::now();
        let outcome = match within(deadline, camera.fetch_properties()).await {
            Ok(_) => CheckOutcome::passed(GET_PROPERTIES, 1, started.elapsed()),
            Err(e) => {
                debug!("Properties call failed: {}", e);
                CheckOutcome::failed(
                    GET_PROPERTIES,
                    "no property set on the first call",
                    1,
                    started.elapsed(),
                )
            }
        };
        log_outcome(outcome)
    }
    .instrument(info_span!("check", name = GET_PROPERTIES))
    .await
}

/// Shrink the polling window to what is left before `deadline`
fn bounded(poll: PollSettings, deadline: Instant) -> Option<PollSettings> {
    let remaining = deadline.checked_duration_since(Instant::now())?;
    if remaining.is_zero() {
        return None;
    }
    Some(PollSettings {
        timeout: poll.timeout.min(remaining),
        ..poll
    })
}

async fn within<T, F>(deadline: Instant, call: F) -> Result<T, CallError>
where
    F: Future<Output = Result<T, CallError>>,
{
    let started = Instant::now();
    match timeout_at(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(CallError::Timeout(started.elapsed())),
    }
}

fn out_of_time(name: &str) -> CheckOutcome {
    CheckOutcome::failed(
        name,
        "scenario deadline reached before the check started",
        0,
        std::time::Duration::ZERO,
    )
}

fn log_outcome(outcome: CheckOutcome) -> CheckOutcome {
    match outcome.reason() {
        None => info!(
            "Check passed after {} attempt(s) in {:?}",
            outcome.attempts, outcome.elapsed
        ),
        Some(reason) => warn!("Check failed: {}", reason),
    }
    outcome
}
