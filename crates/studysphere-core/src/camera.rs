//! Camera capture as a scoped resource.
//!
//! A [`CaptureSession`] owns the open stream; dropping it, capturing with it,
//! or cancelling it always stops the stream.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;

use crate::error::ChatError;
use crate::ingest::UploadCandidate;

const CAMERA_ERROR: &str = "Could not access camera. Please check permissions.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
    User,
    #[default]
    Environment,
}

/// An open camera stream
#[async_trait]
pub trait CameraStream: Send {
    /// Grab one still frame as JPEG bytes
    async fn grab_frame(&mut self) -> Result<Vec<u8>, ChatError>;
    /// Release the device. Called exactly once per stream.
    fn stop(&mut self);
}

pub trait CameraDevice: Send + Sync {
    fn open(&self, facing: FacingMode) -> Result<Box<dyn CameraStream>, ChatError>;
}

pub struct CaptureSession {
    stream: Option<Box<dyn CameraStream>>,
}

impl CaptureSession {
    pub fn open(device: &dyn CameraDevice, facing: FacingMode) -> Result<Self, ChatError> {
        let stream = device.open(facing).map_err(|e| {
            tracing::warn!(error = %e, "Camera access error");
            e
        })?;
        tracing::debug!(?facing, "Camera opened");
        Ok(Self {
            stream: Some(stream),
        })
    }

    /// Take a single still frame; the session closes whatever the outcome.
    pub async fn capture(mut self) -> Result<UploadCandidate, ChatError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ChatError::DeviceUnavailable(CAMERA_ERROR.to_string()))?;
        let frame = stream.grab_frame().await?;
        if frame.is_empty() {
            return Err(ChatError::DeviceUnavailable(
                "Camera returned an empty frame.".to_string(),
            ));
        }
        Ok(UploadCandidate::from_camera_frame(&frame))
    }

    pub fn cancel(self) {}
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::debug!("Camera stream stopped");
        }
    }
}

/// Camera backed by a device node and an external one-frame capture command,
/// `ffmpeg` by default. `{device}` in the command is replaced by the device
/// path.
pub struct CommandCamera {
    user_device: String,
    environment_device: String,
    command: Vec<String>,
}

impl CommandCamera {
    pub fn new(device: &str, command: Vec<String>) -> Self {
        Self {
            user_device: device.to_string(),
            environment_device: device.to_string(),
            command,
        }
    }

    pub fn with_user_device(mut self, device: &str) -> Self {
        self.user_device = device.to_string();
        self
    }

    pub fn default_command() -> Vec<String> {
        [
            "ffmpeg", "-loglevel", "error", "-f", "v4l2", "-i", "{device}", "-frames:v", "1",
            "-f", "image2pipe", "-vcodec", "mjpeg", "-",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

impl CameraDevice for CommandCamera {
    fn open(&self, facing: FacingMode) -> Result<Box<dyn CameraStream>, ChatError> {
        let device = match facing {
            FacingMode::User => &self.user_device,
            FacingMode::Environment => &self.environment_device,
        };
        if self.command.is_empty() || !Path::new(device).exists() {
            return Err(ChatError::DeviceUnavailable(CAMERA_ERROR.to_string()));
        }

        let args = self
            .command
            .iter()
            .map(|arg| arg.replace("{device}", device))
            .collect();
        Ok(Box::new(CommandStream {
            args,
            stopped: false,
        }))
    }
}

struct CommandStream {
    args: Vec<String>,
    stopped: bool,
}

#[async_trait]
impl CameraStream for CommandStream {
    async fn grab_frame(&mut self) -> Result<Vec<u8>, ChatError> {
        if self.stopped {
            return Err(ChatError::DeviceUnavailable(CAMERA_ERROR.to_string()));
        }
        let (program, rest) = self
            .args
            .split_first()
            .ok_or_else(|| ChatError::DeviceUnavailable(CAMERA_ERROR.to_string()))?;

        let output = tokio::process::Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ChatError::DeviceUnavailable(format!("{} ({})", CAMERA_ERROR, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ChatError::DeviceUnavailable(format!(
                "{} ({})",
                CAMERA_ERROR,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct FakeCamera {
        available: bool,
        fail_frame: bool,
        stops: Arc<AtomicUsize>,
        opened: Arc<AtomicUsize>,
    }

    struct FakeStream {
        fail_frame: bool,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CameraStream for FakeStream {
        async fn grab_frame(&mut self) -> Result<Vec<u8>, ChatError> {
            if self.fail_frame {
                Err(ChatError::DeviceUnavailable("frame lost".to_string()))
            } else {
                Ok(vec![0xFF, 0xD8, 0xFF, 0xE0])
            }
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CameraDevice for FakeCamera {
        fn open(&self, _facing: FacingMode) -> Result<Box<dyn CameraStream>, ChatError> {
            if !self.available {
                return Err(ChatError::DeviceUnavailable(CAMERA_ERROR.to_string()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                fail_frame: self.fail_frame,
                stops: self.stops.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn test_capture_yields_ready_candidate_and_stops_stream() {
        let camera = FakeCamera {
            available: true,
            ..Default::default()
        };
        let session = CaptureSession::open(&camera, FacingMode::Environment).unwrap();
        let candidate = session.capture().await.unwrap();

        assert_eq!(candidate.progress, 100);
        assert!(candidate.is_ready());
        assert_eq!(camera.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_capture_still_stops_stream() {
        let camera = FakeCamera {
            available: true,
            fail_frame: true,
            ..Default::default()
        };
        let session = CaptureSession::open(&camera, FacingMode::Environment).unwrap();
        let err = session.capture().await.unwrap_err();

        assert!(matches!(err, ChatError::DeviceUnavailable(_)));
        assert_eq!(camera.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_and_drop_stop_stream() {
        let camera = FakeCamera {
            available: true,
            ..Default::default()
        };
        CaptureSession::open(&camera, FacingMode::User).unwrap().cancel();
        drop(CaptureSession::open(&camera, FacingMode::User).unwrap());

        assert_eq!(camera.opened.load(Ordering::SeqCst), 2);
        assert_eq!(camera.stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unavailable_camera_leaves_nothing_open() {
        let camera = FakeCamera::default();
        let err = CaptureSession::open(&camera, FacingMode::Environment).err().unwrap();

        assert_eq!(err.to_string(), CAMERA_ERROR);
        assert_eq!(camera.opened.load(Ordering::SeqCst), 0);
        assert_eq!(camera.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_command_camera_missing_device() {
        let camera = CommandCamera::new("/dev/no-such-video-device", CommandCamera::default_command());
        assert!(matches!(
            camera.open(FacingMode::Environment),
            Err(ChatError::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_command_camera_reads_frame_from_stdout() {
        let dir = tempfile::TempDir::new().unwrap();
        let device = dir.path().join("video0");
        std::fs::write(&device, b"").unwrap();
        let frame = dir.path().join("frame.jpg");
        std::fs::write(&frame, b"\xFF\xD8jpeg").unwrap();

        let camera = CommandCamera::new(
            device.to_str().unwrap(),
            vec!["cat".to_string(), frame.to_str().unwrap().to_string()],
        );
        let session = CaptureSession::open(&camera, FacingMode::Environment).unwrap();
        let candidate = session.capture().await.unwrap();
        assert!(candidate.payload.unwrap().data.starts_with("/9hq"));
    }
}
