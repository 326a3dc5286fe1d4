//! WebSocket frame stream
//!
//! One connection streams the frames of one active session, and a session
//! accepts one connection at a time. Frames are handled strictly in order;
//! each one is stamped and applied on the blocking pool while holding that
//! session's lock, so a disconnect can only fall between frames.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use frame_capture::{EncodedFrame, FrameError};
use gaze::{GazeError, LandmarkFrame, LandmarkProvider};
use serde::{Deserialize, Serialize};
use session::{Direction, FrameStatus, FrameTime, SessionError, SessionHandle, SessionId};
use std::sync::Arc;
use storage::EvidenceStore;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{telemetry, ApiError, AppState};

/// Query parameters for the stream endpoint
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub session_id: SessionId,
}

/// Frame message sent by the client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Landmarks detected client-side; `face: null` means no face
    Landmarks {
        face: Option<LandmarkFrame>,
        #[serde(default)]
        image: Option<String>,
    },
    /// Raw normalized face mesh as produced by MediaPipe
    Mesh {
        width: u32,
        height: u32,
        points: Option<Vec<[f32; 2]>>,
        #[serde(default)]
        image: Option<String>,
    },
    /// Image only; the server detects landmarks
    Image { image: String },
}

/// Reply sent after every frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Status {
        direction: Direction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flagged_image: Option<String>,
    },
    Error {
        error: String,
    },
}

/// Why a frame could not be applied
#[derive(Error, Debug)]
pub enum FrameFailure {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Gaze(#[from] GazeError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Frame worker failed: {0}")]
    Worker(String),
}

impl FrameFailure {
    /// Failures that end the stream regardless of the failure budget
    fn is_terminal(&self) -> bool {
        matches!(self, FrameFailure::Session(_) | FrameFailure::Worker(_))
    }
}

/// Reply to one frame, and whether the stream must close after it
#[derive(Debug, Clone, PartialEq)]
pub struct StreamReply {
    pub message: ServerMessage,
    pub close: bool,
}

enum LandmarkSource {
    Provided(Option<LandmarkFrame>),
    Mesh {
        width: u32,
        height: u32,
        points: Option<Vec<[f32; 2]>>,
    },
    Detect,
}

enum ImagePayload {
    Base64(String),
    Raw(Vec<u8>),
}

struct FrameInput {
    landmarks: LandmarkSource,
    image: Option<ImagePayload>,
}

/// Per-connection frame processing context
pub struct FrameStream {
    session_id: SessionId,
    handle: SessionHandle,
    evidence: Arc<dyn EvidenceStore>,
    provider: Option<Box<dyn LandmarkProvider>>,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    sequence: u64,
}

impl FrameStream {
    /// Claim an active session for this stream; fails if another stream holds it
    pub fn attach(
        session_id: SessionId,
        handle: SessionHandle,
        evidence: Arc<dyn EvidenceStore>,
        provider: Box<dyn LandmarkProvider>,
        max_consecutive_failures: u32,
    ) -> Result<Self, SessionError> {
        handle
            .lock()
            .map_err(|e| SessionError::Lock(e.to_string()))?
            .attach_stream()?;
        Ok(Self {
            session_id,
            handle,
            evidence,
            provider: Some(provider),
            max_consecutive_failures,
            consecutive_failures: 0,
            sequence: 0,
        })
    }

    /// Frames received so far
    pub fn frames_received(&self) -> u64 {
        self.sequence
    }

    pub async fn handle_text(&mut self, text: &str) -> StreamReply {
        self.sequence += 1;
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.process(FrameInput::from(message)).await,
            Err(e) => self.on_failure(FrameFailure::Malformed(e.to_string())),
        }
    }

    pub async fn handle_binary(&mut self, bytes: Vec<u8>) -> StreamReply {
        self.sequence += 1;
        let input = FrameInput {
            landmarks: LandmarkSource::Detect,
            image: Some(ImagePayload::Raw(bytes)),
        };
        self.process(input).await
    }

    async fn process(&mut self, input: FrameInput) -> StreamReply {
        let sequence = self.sequence;
        let handle = Arc::clone(&self.handle);
        let evidence = Arc::clone(&self.evidence);
        let mut provider = self.provider.take();

        let joined = tokio::task::spawn_blocking(move || {
            let result = apply_frame(
                input,
                sequence,
                &mut provider,
                &handle,
                evidence.as_ref(),
            );
            (provider, result)
        })
        .await;

        match joined {
            Ok((provider, Ok(status))) => {
                self.provider = provider;
                self.on_success(status)
            }
            Ok((provider, Err(failure))) => {
                self.provider = provider;
                self.on_failure(failure)
            }
            Err(e) => {
                error!("Frame worker for session {} failed: {}", self.session_id, e);
                self.on_failure(FrameFailure::Worker(e.to_string()))
            }
        }
    }

    fn on_success(&mut self, status: FrameStatus) -> StreamReply {
        self.consecutive_failures = 0;
        telemetry::record_frame(&status);
        debug!(
            "Session {} frame {}: {} ({:?})",
            self.session_id,
            self.sequence,
            status.direction.as_str(),
            status.status
        );
        StreamReply {
            message: ServerMessage::Status {
                direction: status.direction,
                flagged_image: status.flagged_image().map(str::to_string),
            },
            close: false,
        }
    }

    fn on_failure(&mut self, failure: FrameFailure) -> StreamReply {
        telemetry::record_frame_error();
        self.consecutive_failures += 1;

        if failure.is_terminal() {
            warn!("Closing stream for session {}: {}", self.session_id, failure);
            return StreamReply {
                message: ServerMessage::Error {
                    error: failure.to_string(),
                },
                close: true,
            };
        }

        if self.consecutive_failures >= self.max_consecutive_failures {
            warn!(
                "Closing stream for session {} after {} consecutive failed frames: {}",
                self.session_id, self.consecutive_failures, failure
            );
            return StreamReply {
                message: ServerMessage::Error {
                    error: format!(
                        "Too many consecutive failed frames ({}): {}",
                        self.consecutive_failures, failure
                    ),
                },
                close: true,
            };
        }

        debug!("Session {} frame {} failed: {}", self.session_id, self.sequence, failure);
        StreamReply {
            message: ServerMessage::Error {
                error: failure.to_string(),
            },
            close: false,
        }
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        match self.handle.lock() {
            Ok(mut session) => session.detach_stream(),
            Err(poisoned) => poisoned.into_inner().detach_stream(),
        }
    }
}

impl From<ClientMessage> for FrameInput {
    fn from(message: ClientMessage) -> Self {
        match message {
            ClientMessage::Landmarks { face, image } => FrameInput {
                landmarks: LandmarkSource::Provided(face),
                image: image.map(ImagePayload::Base64),
            },
            ClientMessage::Mesh {
                width,
                height,
                points,
                image,
            } => FrameInput {
                landmarks: LandmarkSource::Mesh {
                    width,
                    height,
                    points,
                },
                image: image.map(ImagePayload::Base64),
            },
            ClientMessage::Image { image } => FrameInput {
                landmarks: LandmarkSource::Detect,
                image: Some(ImagePayload::Base64(image)),
            },
        }
    }
}

/// Decode, detect and apply one frame. Runs on the blocking pool.
///
/// The frame is stamped after the session lock is taken, so log timestamps
/// follow the order frames are applied in.
fn apply_frame(
    input: FrameInput,
    sequence: u64,
    provider: &mut Option<Box<dyn LandmarkProvider>>,
    handle: &SessionHandle,
    evidence: &dyn EvidenceStore,
) -> Result<FrameStatus, FrameFailure> {
    let image = match input.image {
        Some(ImagePayload::Base64(payload)) => Some(EncodedFrame::from_base64(&payload, sequence)?),
        Some(ImagePayload::Raw(bytes)) => Some(EncodedFrame::from_bytes(bytes, sequence)?),
        None => None,
    };

    let landmarks = match input.landmarks {
        LandmarkSource::Provided(face) => {
            if let Some(face) = &face {
                face.validate()?;
            }
            face
        }
        LandmarkSource::Mesh {
            width,
            height,
            points,
        } => points
            .map(|points| LandmarkFrame::from_face_mesh(&points, width, height))
            .transpose()?,
        LandmarkSource::Detect => {
            let provider = provider
                .as_deref_mut()
                .ok_or(GazeError::DetectorUnavailable)?;
            let encoded = image
                .as_ref()
                .ok_or_else(|| FrameFailure::Malformed("frame carries no image".to_string()))?;
            let detected = provider.detect(&encoded.decode()?)?;
            if let Some(face) = &detected {
                face.validate()?;
            }
            detected
        }
    };

    let mut session = handle
        .lock()
        .map_err(|e| SessionError::Lock(e.to_string()))?;
    let at = FrameTime::now();
    let status = session.process_frame(landmarks.as_ref(), image.as_ref(), at, evidence)?;
    Ok(status)
}

/// Upgrade to a frame stream for an active session
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let session_id = query.session_id;
    let handle = state.registry.get(&session_id)?;
    let stream = FrameStream::attach(
        session_id,
        handle,
        Arc::clone(&state.evidence),
        (state.providers)(),
        state.max_consecutive_failures,
    )?;
    Ok(ws.on_upgrade(move |socket| run_stream(socket, stream)))
}

async fn run_stream(mut socket: WebSocket, mut stream: FrameStream) {
    info!("Stream opened for session {}", stream.session_id);

    while let Some(received) = socket.recv().await {
        let message = match received {
            Ok(message) => message,
            Err(e) => {
                warn!("Stream for session {} broke: {}", stream.session_id, e);
                break;
            }
        };

        let reply = match message {
            Message::Text(text) => stream.handle_text(&text).await,
            Message::Binary(bytes) => stream.handle_binary(bytes).await,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let payload = match serde_json::to_string(&reply.message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize reply for session {}: {}", stream.session_id, e);
                break;
            }
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            break;
        }
        if reply.close {
            let _ = socket.send(Message::Close(None)).await;
            break;
        }
    }

    info!(
        "Stream closed for session {} after {} frames",
        stream.session_id,
        stream.frames_received()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use gaze::landmarks::mesh;
    use gaze::{EyeLandmarks, GazeConfig, Point};
    use session::SessionRegistry;
    use storage::MemoryRepository;

    fn registry(away_threshold_ms: u64) -> SessionRegistry {
        SessionRegistry::new(GazeConfig {
            away_threshold_ms,
            ..Default::default()
        })
        .unwrap()
    }

    fn stream_for(
        registry: &SessionRegistry,
        store: &Arc<MemoryRepository>,
        provider: Box<dyn LandmarkProvider>,
        max_failures: u32,
    ) -> (SessionId, FrameStream) {
        let id = registry.start().unwrap();
        let handle = registry.get(&id).unwrap();
        let evidence: Arc<dyn EvidenceStore> = store.clone();
        let stream = FrameStream::attach(id, handle, evidence, provider, max_failures).unwrap();
        (id, stream)
    }

    fn eye(iris_x: f32) -> EyeLandmarks {
        EyeLandmarks {
            outer_corner: Point::new(0.0, 0.0),
            inner_corner: Point::new(100.0, 0.0),
            iris: vec![Point::new(iris_x, 0.0)],
        }
    }

    fn face(iris_x: f32) -> LandmarkFrame {
        LandmarkFrame {
            width: 640,
            height: 480,
            left_eye: Some(eye(iris_x)),
            right_eye: Some(eye(iris_x)),
        }
    }

    fn jpeg_base64() -> String {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([40, 80, 120]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Jpeg).unwrap();
        base64::engine::general_purpose::STANDARD.encode(bytes.into_inner())
    }

    fn landmarks_message(face: Option<LandmarkFrame>, image: Option<String>) -> String {
        let mut value = serde_json::json!({ "type": "landmarks", "face": face });
        if let Some(image) = image {
            value["image"] = serde_json::Value::String(image);
        }
        value.to_string()
    }

    struct FixedProvider(Option<LandmarkFrame>);

    impl LandmarkProvider for FixedProvider {
        fn detect(&mut self, _frame: &frame_capture::VideoFrame) -> Result<Option<LandmarkFrame>, GazeError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_center_frame_reports_direction() {
        let registry = registry(3000);
        let store = Arc::new(MemoryRepository::new());
        let (_, mut stream) = stream_for(&registry, &store, Box::new(gaze::UnavailableProvider), 10);

        let reply = stream.handle_text(&landmarks_message(Some(face(50.0)), None)).await;
        assert_eq!(
            reply.message,
            ServerMessage::Status {
                direction: Direction::Center,
                flagged_image: None
            }
        );
        assert!(!reply.close);
    }

    #[tokio::test]
    async fn test_flagged_frame_stores_evidence() {
        let registry = registry(0);
        let store = Arc::new(MemoryRepository::new());
        let (id, mut stream) = stream_for(&registry, &store, Box::new(gaze::UnavailableProvider), 10);

        let message = landmarks_message(Some(face(10.0)), Some(jpeg_base64()));
        let reply = stream.handle_text(&message).await;
        let ServerMessage::Status { direction, flagged_image } = reply.message else {
            panic!("expected a status reply");
        };
        assert_eq!(direction, Direction::Flagged);
        let reference = flagged_image.unwrap();
        assert!(reference.contains(&id.to_string()));
        assert!(reference.ends_with(".jpg"));
        assert_eq!(store.image_count(), 1);

        let handle = registry.get(&id).unwrap();
        let session = handle.lock().unwrap();
        assert_eq!(session.events().len(), 1);
        assert_eq!(session.events()[0].flagged_image.as_deref(), Some(reference.as_str()));
    }

    #[tokio::test]
    async fn test_no_face_counts_as_away() {
        let registry = registry(0);
        let store = Arc::new(MemoryRepository::new());
        let (_, mut stream) = stream_for(&registry, &store, Box::new(gaze::UnavailableProvider), 10);

        let reply = stream.handle_text(r#"{"type":"landmarks","face":null}"#).await;
        assert!(matches!(
            reply.message,
            ServerMessage::Status { direction: Direction::Flagged, flagged_image: None }
        ));
    }

    #[tokio::test]
    async fn test_mesh_message() {
        let registry = registry(3000);
        let store = Arc::new(MemoryRepository::new());
        let (_, mut stream) = stream_for(&registry, &store, Box::new(gaze::UnavailableProvider), 10);

        let mut points = vec![[0.5f32, 0.5f32]; mesh::REFINED_POINTS];
        points[mesh::RIGHT_EYE_OUTER] = [0.30, 0.5];
        points[mesh::RIGHT_EYE_INNER] = [0.40, 0.5];
        for &i in mesh::RIGHT_IRIS.iter() {
            points[i] = [0.31, 0.5];
        }
        points[mesh::LEFT_EYE_INNER] = [0.60, 0.5];
        points[mesh::LEFT_EYE_OUTER] = [0.70, 0.5];
        for &i in mesh::LEFT_IRIS.iter() {
            points[i] = [0.61, 0.5];
        }
        let message = serde_json::json!({
            "type": "mesh",
            "width": 640,
            "height": 480,
            "points": points,
        });

        let reply = stream.handle_text(&message.to_string()).await;
        assert_eq!(
            reply.message,
            ServerMessage::Status {
                direction: Direction::Right,
                flagged_image: None
            }
        );
    }

    #[tokio::test]
    async fn test_server_side_detection() {
        let registry = registry(3000);
        let store = Arc::new(MemoryRepository::new());
        let provider = Box::new(FixedProvider(Some(face(90.0))));
        let (_, mut stream) = stream_for(&registry, &store, provider, 10);

        let image = serde_json::json!({ "type": "image", "image": jpeg_base64() });
        let reply = stream.handle_text(&image.to_string()).await;
        assert!(matches!(
            reply.message,
            ServerMessage::Status { direction: Direction::Left, .. }
        ));

        let raw = base64::engine::general_purpose::STANDARD
            .decode(jpeg_base64())
            .unwrap();
        let reply = stream.handle_binary(raw).await;
        assert!(matches!(
            reply.message,
            ServerMessage::Status { direction: Direction::Left, .. }
        ));
        assert_eq!(stream.frames_received(), 2);
    }

    #[tokio::test]
    async fn test_failures_recover_then_close_at_limit() {
        let registry = registry(3000);
        let store = Arc::new(MemoryRepository::new());
        let (id, mut stream) = stream_for(&registry, &store, Box::new(gaze::UnavailableProvider), 3);

        let bad = stream.handle_text("not json").await;
        assert!(matches!(bad.message, ServerMessage::Error { .. }));
        assert!(!bad.close);

        // A good frame resets the failure budget
        let good = stream.handle_text(&landmarks_message(Some(face(50.0)), None)).await;
        assert!(!good.close);

        let image = serde_json::json!({ "type": "image", "image": jpeg_base64() }).to_string();
        assert!(!stream.handle_text(&image).await.close);
        assert!(!stream.handle_text(&image).await.close);
        let last = stream.handle_text(&image).await;
        assert!(last.close);
        let ServerMessage::Error { error } = last.message else {
            panic!("expected an error reply");
        };
        assert!(error.contains("Too many consecutive failed frames"));

        // Failed frames never touch the session
        let handle = registry.get(&id).unwrap();
        assert_eq!(handle.lock().unwrap().frames_processed(), 1);
    }

    #[tokio::test]
    async fn test_bad_image_is_recoverable() {
        let registry = registry(3000);
        let store = Arc::new(MemoryRepository::new());
        let (_, mut stream) = stream_for(&registry, &store, Box::new(gaze::UnavailableProvider), 10);

        let message = landmarks_message(Some(face(50.0)), Some("%%%".to_string()));
        let reply = stream.handle_text(&message).await;
        assert!(matches!(reply.message, ServerMessage::Error { .. }));
        assert!(!reply.close);
    }

    #[tokio::test]
    async fn test_inactive_session_closes_stream() {
        let registry = registry(3000);
        let store = Arc::new(MemoryRepository::new());
        let (id, mut stream) = stream_for(&registry, &store, Box::new(gaze::UnavailableProvider), 10);

        registry.get(&id).unwrap().lock().unwrap().deactivate();
        let reply = stream.handle_text(&landmarks_message(Some(face(50.0)), None)).await;
        assert!(reply.close);
        assert!(matches!(reply.message, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn test_second_stream_rejected_until_first_closes() {
        let registry = registry(3000);
        let store = Arc::new(MemoryRepository::new());
        let (id, first) = stream_for(&registry, &store, Box::new(gaze::UnavailableProvider), 10);

        let second = FrameStream::attach(
            id,
            registry.get(&id).unwrap(),
            store.clone(),
            Box::new(gaze::UnavailableProvider),
            10,
        );
        assert!(matches!(second, Err(SessionError::Busy(_))));

        drop(first);
        assert!(!registry.get(&id).unwrap().lock().unwrap().is_streaming());
        let mut reopened = FrameStream::attach(
            id,
            registry.get(&id).unwrap(),
            store.clone(),
            Box::new(gaze::UnavailableProvider),
            10,
        )
        .unwrap();
        let reply = reopened.handle_text(&landmarks_message(Some(face(50.0)), None)).await;
        assert!(matches!(reply.message, ServerMessage::Status { .. }));
    }

    #[tokio::test]
    async fn test_stream_rejected_for_ended_session() {
        let registry = registry(3000);
        let id = registry.start().unwrap();
        registry.get(&id).unwrap().lock().unwrap().deactivate();

        let store: Arc<dyn EvidenceStore> = Arc::new(MemoryRepository::new());
        let result = FrameStream::attach(
            id,
            registry.get(&id).unwrap(),
            store,
            Box::new(gaze::UnavailableProvider),
            10,
        );
        assert!(matches!(result, Err(SessionError::Inactive(_))));
    }

    #[tokio::test]
    async fn test_degenerate_landmarks_are_recoverable_errors() {
        let registry = registry(0);
        let store = Arc::new(MemoryRepository::new());
        let (id, mut stream) = stream_for(&registry, &store, Box::new(gaze::UnavailableProvider), 10);

        let empty_mesh = serde_json::json!({
            "type": "mesh",
            "width": 0,
            "height": 0,
            "points": vec![[0.5f32, 0.5f32]; mesh::REFINED_POINTS],
        });
        let reply = stream.handle_text(&empty_mesh.to_string()).await;
        assert!(matches!(reply.message, ServerMessage::Error { .. }));
        assert!(!reply.close);

        let mut empty_face = face(50.0);
        empty_face.width = 0;
        let reply = stream.handle_text(&landmarks_message(Some(empty_face), None)).await;
        assert!(matches!(reply.message, ServerMessage::Error { .. }));
        assert!(!reply.close);

        let provider = Box::new(FixedProvider(Some(LandmarkFrame {
            height: 0,
            ..face(50.0)
        })));
        let (detected_id, mut detected) = stream_for(&registry, &store, provider, 10);
        let image = serde_json::json!({ "type": "image", "image": jpeg_base64() });
        let reply = detected.handle_text(&image.to_string()).await;
        assert!(matches!(reply.message, ServerMessage::Error { .. }));
        assert_eq!(registry.get(&detected_id).unwrap().lock().unwrap().frames_processed(), 0);

        let handle = registry.get(&id).unwrap();
        let session = handle.lock().unwrap();
        assert_eq!(session.frames_processed(), 0);
        assert!(session.events().is_empty());
    }

    #[test]
    fn test_reply_wire_format() {
        let status = ServerMessage::Status {
            direction: Direction::Flagged,
            flagged_image: Some("suspicious_behaviour/image/a.jpg".to_string()),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["direction"], "Flagged");
        assert_eq!(json["flagged_image"], "suspicious_behaviour/image/a.jpg");

        let plain = ServerMessage::Status {
            direction: Direction::Left,
            flagged_image: None,
        };
        assert_eq!(serde_json::to_string(&plain).unwrap(), r#"{"direction":"Looking Left"}"#);

        let error = ServerMessage::Error { error: "bad frame".to_string() };
        assert_eq!(serde_json::to_string(&error).unwrap(), r#"{"error":"bad frame"}"#);
    }
}
