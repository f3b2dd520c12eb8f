//! Per-(watch, entity) camera stream sessions. A session lives for the
//! duration of one MJPEG response; the viewport control endpoint
//! mutates it mid-stream and the frame loop reads the live values on
//! every iteration.

use std::time::Duration;

use dashmap::DashMap;

pub mod frame;

pub const MIN_WIDTH: u32 = 50;
pub const MAX_WIDTH: u32 = 2000;
pub const MIN_QUALITY: u8 = 10;
pub const MAX_QUALITY: u8 = 95;
pub const MIN_FPS: f32 = 0.5;
pub const MAX_FPS: f32 = 10.0;
pub const DEFAULT_WIDTH: u32 = 400;
pub const DEFAULT_QUALITY: u8 = 75;
pub const DEFAULT_FPS: f32 = 2.0;
pub const MAX_BATCH_CAMERAS: usize = 8;
pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);
/// Consecutive failures of a source override before reverting to the
/// stream's original entity.
pub const OVERRIDE_FAILURE_LIMIT: u32 = 5;

pub fn clamp_width(width: u32) -> u32 {
    width.clamp(MIN_WIDTH, MAX_WIDTH)
}

pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_QUALITY, MAX_QUALITY)
}

pub fn clamp_fps(fps: f32) -> f32 {
    fps.clamp(MIN_FPS, MAX_FPS)
}

/// Normalized crop region in [0, 1] coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            x: 0.0,
            y: 0.0,
            w: 1.0,
            h: 1.0,
        }
    }
}

impl Viewport {
    pub fn clamped(x: f32, y: f32, w: f32, h: f32) -> Self {
        Viewport {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
            w: w.clamp(0.01, 1.0),
            h: h.clamp(0.01, 1.0),
        }
    }

    /// Full frame within 0.1% tolerance; the crop is skipped then.
    pub fn is_full_frame(&self) -> bool {
        self.x <= 0.001 && self.y <= 0.001 && self.w >= 0.999 && self.h >= 0.999
    }
}

#[derive(Debug, Clone)]
pub struct StreamSession {
    pub viewport: Viewport,
    pub width: u32,
    pub quality: u8,
    pub fps: f32,
    /// Fetch frames from this entity instead of the stream's own.
    pub source_entity_id: Option<String>,
}

/// Field-wise update applied to a live session. `source` distinguishes
/// "leave alone" from "clear" from "set".
#[derive(Debug, Clone, Default)]
pub struct StreamUpdate {
    pub viewport: Option<Viewport>,
    pub width: Option<u32>,
    pub quality: Option<u8>,
    pub fps: Option<f32>,
    pub source: SourceUpdate,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SourceUpdate {
    #[default]
    Keep,
    Clear,
    Set(String),
}

pub struct StreamSessions {
    sessions: DashMap<(String, String), StreamSession>,
}

impl StreamSessions {
    pub fn new() -> Self {
        StreamSessions {
            sessions: DashMap::new(),
        }
    }

    pub fn open(
        &self,
        watch_id: &str,
        entity_id: &str,
        width: u32,
        quality: u8,
        fps: f32,
        viewport: Viewport,
    ) {
        let key = (watch_id.to_string(), entity_id.to_string());
        self.sessions
            .entry(key)
            .and_modify(|session| {
                session.width = width;
                session.quality = quality;
                session.fps = fps;
            })
            .or_insert(StreamSession {
                viewport,
                width,
                quality,
                fps,
                source_entity_id: None,
            });
    }

    pub fn current(&self, watch_id: &str, entity_id: &str) -> Option<StreamSession> {
        self.sessions
            .get(&(watch_id.to_string(), entity_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Apply a control update to a live session. Returns false when no
    /// stream session exists for the key.
    pub fn update(&self, watch_id: &str, entity_id: &str, update: StreamUpdate) -> bool {
        let Some(mut entry) = self
            .sessions
            .get_mut(&(watch_id.to_string(), entity_id.to_string()))
        else {
            return false;
        };
        let session = entry.value_mut();
        if let Some(viewport) = update.viewport {
            session.viewport = viewport;
        }
        if let Some(width) = update.width {
            session.width = clamp_width(width);
        }
        if let Some(quality) = update.quality {
            session.quality = clamp_quality(quality);
        }
        if let Some(fps) = update.fps {
            session.fps = clamp_fps(fps);
        }
        match update.source {
            SourceUpdate::Keep => {}
            SourceUpdate::Clear => session.source_entity_id = None,
            SourceUpdate::Set(source) => session.source_entity_id = Some(source),
        }
        true
    }

    pub fn clear_source_override(&self, watch_id: &str, entity_id: &str) {
        if let Some(mut entry) = self
            .sessions
            .get_mut(&(watch_id.to_string(), entity_id.to_string()))
        {
            entry.value_mut().source_entity_id = None;
        }
    }

    pub fn remove(&self, watch_id: &str, entity_id: &str) {
        self.sessions
            .remove(&(watch_id.to_string(), entity_id.to_string()));
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for StreamSessions {
    fn default() -> Self {
        StreamSessions::new()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(10, MIN_WIDTH ; "width clamps up")]
    #[test_case(9000, MAX_WIDTH ; "width clamps down")]
    #[test_case(640, 640 ; "width in range")]
    fn width_clamp(input: u32, expected: u32) {
        assert_eq!(clamp_width(input), expected);
    }

    #[test]
    fn viewport_clamps_into_unit_square() {
        let viewport = Viewport::clamped(-0.5, 1.5, 0.0, 2.0);
        assert_eq!(viewport.x, 0.0);
        assert_eq!(viewport.y, 1.0);
        assert_eq!(viewport.w, 0.01);
        assert_eq!(viewport.h, 1.0);
    }

    #[test]
    fn full_frame_detection_has_tolerance() {
        assert!(Viewport::default().is_full_frame());
        assert!(
            Viewport {
                x: 0.0009,
                y: 0.0,
                w: 0.9991,
                h: 1.0
            }
            .is_full_frame()
        );
        assert!(
            !Viewport {
                x: 0.25,
                y: 0.25,
                w: 0.5,
                h: 0.5
            }
            .is_full_frame()
        );
    }

    #[test]
    fn reopening_keeps_viewport_but_refreshes_params() {
        let sessions = StreamSessions::new();
        sessions.open("w1", "camera.door", 400, 75, 2.0, Viewport::default());
        sessions.update(
            "w1",
            "camera.door",
            StreamUpdate {
                viewport: Some(Viewport::clamped(0.25, 0.25, 0.5, 0.5)),
                ..StreamUpdate::default()
            },
        );
        sessions.open("w1", "camera.door", 800, 60, 5.0, Viewport::default());

        let session = sessions.current("w1", "camera.door").unwrap();
        assert_eq!(session.width, 800);
        assert_eq!(session.quality, 60);
        assert_eq!(session.viewport.w, 0.5, "existing viewport survives reopen");
    }

    #[test]
    fn update_on_unknown_session_reports_missing() {
        let sessions = StreamSessions::new();
        assert!(!sessions.update("w1", "camera.door", StreamUpdate::default()));
    }

    #[test]
    fn update_clamps_and_clears_override() {
        let sessions = StreamSessions::new();
        sessions.open("w1", "camera.door", 400, 75, 2.0, Viewport::default());

        sessions.update(
            "w1",
            "camera.door",
            StreamUpdate {
                width: Some(5000),
                quality: Some(1),
                fps: Some(100.0),
                source: SourceUpdate::Set("camera.backup".into()),
                ..StreamUpdate::default()
            },
        );
        let session = sessions.current("w1", "camera.door").unwrap();
        assert_eq!(session.width, MAX_WIDTH);
        assert_eq!(session.quality, MIN_QUALITY);
        assert_eq!(session.fps, MAX_FPS);
        assert_eq!(session.source_entity_id.as_deref(), Some("camera.backup"));

        sessions.update(
            "w1",
            "camera.door",
            StreamUpdate {
                source: SourceUpdate::Clear,
                ..StreamUpdate::default()
            },
        );
        let session = sessions.current("w1", "camera.door").unwrap();
        assert!(session.source_entity_id.is_none());
        assert_eq!(session.width, MAX_WIDTH, "other params untouched");
    }

    #[test]
    fn sessions_are_keyed_per_watch_and_entity() {
        let sessions = StreamSessions::new();
        sessions.open("w1", "camera.door", 400, 75, 2.0, Viewport::default());
        sessions.open("w2", "camera.door", 400, 75, 2.0, Viewport::default());
        assert_eq!(sessions.len(), 2);

        sessions.remove("w1", "camera.door");
        assert!(sessions.current("w1", "camera.door").is_none());
        assert!(sessions.current("w2", "camera.door").is_some());
    }
}
