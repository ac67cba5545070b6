//! Streamed document loading sessions
//!
//! A [`DocumentStream`] owns one [`ChunkStreamParser`] plus a backpressure
//! queue, and hands the framed document to the engine on close. Sessions
//! are identified by distinct, monotonically increasing ids and never share
//! buffers; the id is released to [`NOT_LOADING`] on completion, error, or
//! abort.
//!
//! Two driving styles produce identical results: the backpressured trio
//! [`ready`](DocumentStream::ready) / [`offer`](DocumentStream::offer) /
//! [`process`](DocumentStream::process), and direct synchronous
//! [`write`](DocumentStream::write) calls. The parser underneath never
//! learns which style is in use.

use crate::document;
use crate::engine::{Engine, EngineError};
use crate::scene::SceneId;
use crate::stream::{ChunkStreamParser, IngestState, StreamError};

/// Session-id sentinel: this stream no longer holds a loading session
pub const NOT_LOADING: i64 = -1;
/// Result-index sentinel: the session has not produced a scene
pub const NO_SCENE_PRODUCED: i64 = -1;

/// One streamed document loading session
#[derive(Debug)]
pub struct DocumentStream {
    session: i64,
    name: String,
    parser: ChunkStreamParser,
    queued: Vec<u8>,
    high_water_mark: usize,
    result_index: i64,
}

impl DocumentStream {
    pub(crate) fn open(session: i64, name: String, high_water_mark: usize) -> Self {
        log::debug!("document stream session {session} opened for '{name}'");
        Self {
            session,
            name,
            parser: ChunkStreamParser::new(),
            queued: Vec::new(),
            high_water_mark,
            result_index: NO_SCENE_PRODUCED,
        }
    }

    /// Session id, or [`NOT_LOADING`] once released
    pub fn session_id(&self) -> i64 {
        self.session
    }

    /// Document name this session was opened for
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the produced scene, or [`NO_SCENE_PRODUCED`]
    pub fn result_index(&self) -> i64 {
        self.result_index
    }

    /// Parser state
    pub fn state(&self) -> IngestState {
        self.parser.state()
    }

    /// Bytes accepted so far; zeroed by [`abort`](Self::abort)
    pub fn bytes_consumed(&self) -> u64 {
        self.parser.bytes_consumed()
    }

    fn release(&mut self) {
        self.session = NOT_LOADING;
    }

    fn check_loading(&self) -> Result<(), StreamError> {
        if self.session == NOT_LOADING {
            return Err(self
                .parser
                .rejection()
                .unwrap_or(StreamError::NotLoading));
        }
        Ok(())
    }

    /// Whether a well-behaved caller may offer more data now
    pub fn ready(&self) -> bool {
        self.session != NOT_LOADING
            && !self.parser.state().is_terminal()
            && self.queued.len() < self.high_water_mark
    }

    /// Queue a fragment without parsing it (backpressured driver)
    pub fn offer(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.check_loading()?;
        if let Some(error) = self.parser.rejection() {
            return Err(error);
        }
        self.queued.extend_from_slice(bytes);
        Ok(())
    }

    /// Flush queued fragments into the parser (backpressured driver)
    pub fn process(&mut self) -> Result<(), StreamError> {
        self.check_loading()?;
        let queued = std::mem::take(&mut self.queued);
        if let Err(error) = self.parser.push(&queued) {
            self.release();
            return Err(error);
        }
        Ok(())
    }

    /// Feed a fragment synchronously (direct driver)
    ///
    /// Any queued fragments are flushed first so the two driving styles
    /// may be mixed without reordering bytes.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.process()?;
        if let Err(error) = self.parser.push(bytes) {
            self.release();
            return Err(error);
        }
        Ok(())
    }

    /// Declare the stream finished and materialize the document
    ///
    /// On success the scene index is strictly greater than every index any
    /// earlier session produced. On any failure the session is released
    /// and no scene is produced.
    pub fn close(&mut self, engine: &mut Engine) -> Result<SceneId, EngineError> {
        self.check_loading().map_err(EngineError::from)?;
        let queued = std::mem::take(&mut self.queued);
        let chunks = self
            .parser
            .push(&queued)
            .and_then(|()| self.parser.close());
        // Completion, error, or abort: the session id is released either way.
        let session = self.session;
        self.release();
        let chunks = chunks?;

        let data = document::decode(&chunks)?;
        let id = engine.materialize_document(&self.name, &data)?;
        self.result_index = id.index() as i64;
        log::debug!(
            "document stream session {session} completed as scene #{}",
            id.index()
        );
        Ok(id)
    }

    /// Cancel the session
    ///
    /// Buffers are discarded, the byte count is zeroed, and the result
    /// index stays at [`NO_SCENE_PRODUCED`]. Subsequent writes and the
    /// close are rejected with the same cancellation reason.
    pub fn abort(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        log::debug!("document stream session {} aborted: {reason}", self.session);
        self.queued.clear();
        self.parser.abort(reason);
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EngineConfig;
    use crate::document::DocumentBuilder;
    use crate::resources::ResourceKind;
    use crate::scene::{ComponentTypeDecl, PropertyDescriptor, PropertyKind};

    fn test_engine() -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine
            .register_component(ComponentTypeDecl::data(
                "sprite",
                vec![PropertyDescriptor::new(
                    "texture",
                    PropertyKind::Resource(ResourceKind::Texture),
                )],
            ))
            .unwrap();
        engine
    }

    fn sample_bytes() -> Vec<u8> {
        DocumentBuilder::new()
            .resource(ResourceKind::Texture, "atlas")
            .object(Some("root"), -1, true)
            .object(Some("icon"), 0, true)
            .component("sprite", 1, true, vec![])
            .encode()
            .unwrap()
    }

    #[test]
    fn test_direct_and_backpressured_drivers_agree() {
        let bytes = sample_bytes();
        let mut engine = test_engine();

        let mut direct = engine.open_document_stream("direct");
        direct.write(&bytes).unwrap();
        let first = direct.close(&mut engine).unwrap();

        let mut driven = engine.open_document_stream("driven");
        for fragment in bytes.chunks(7) {
            assert!(driven.ready());
            driven.offer(fragment).unwrap();
            driven.process().unwrap();
        }
        let second = driven.close(&mut engine).unwrap();

        // Result indices are strictly increasing across sessions.
        assert!(direct.result_index() > NO_SCENE_PRODUCED);
        assert!(driven.result_index() > direct.result_index());

        // Identical scenes either way.
        let a = engine.scene(first).unwrap();
        let b = engine.scene(second).unwrap();
        assert_eq!(a.object_count(), b.object_count());
        assert_eq!(
            a.object(a.root_objects()[0]).unwrap().name(),
            b.object(b.root_objects()[0]).unwrap().name()
        );
    }

    #[test]
    fn test_byte_by_byte_load_produces_scene() {
        let bytes = sample_bytes();
        let mut engine = test_engine();
        let mut stream = engine.open_document_stream("trickle");
        for byte in &bytes {
            stream.write(std::slice::from_ref(byte)).unwrap();
        }
        let id = stream.close(&mut engine).unwrap();
        assert!(stream.result_index() > NO_SCENE_PRODUCED);
        assert_eq!(engine.scene(id).unwrap().object_count(), 2);
    }

    #[test]
    fn test_ready_honors_the_high_water_mark() {
        let mut config = EngineConfig::default();
        config.loader.high_water_mark = 4;
        let mut engine = Engine::with_runtime(config, Box::new(crate::runtime::NullRuntime));

        let mut stream = engine.open_document_stream("throttled");
        assert!(stream.ready());
        stream.offer(&[0, 1, 2, 3, 4]).unwrap();
        assert!(!stream.ready());
        // Draining the queue restores readiness (header still incomplete).
        stream.process().unwrap();
        assert!(stream.ready());
    }

    #[test]
    fn test_withholding_one_byte_then_close_fails() {
        let bytes = sample_bytes();
        let mut engine = test_engine();
        let mut stream = engine.open_document_stream("short");
        stream.write(&bytes[..bytes.len() - 1]).unwrap();

        let error = stream.close(&mut engine).unwrap_err();
        assert_eq!(error.to_string(), "Unexpected end of data");
        assert_eq!(stream.session_id(), NOT_LOADING);
        assert_eq!(stream.result_index(), NO_SCENE_PRODUCED);
        // The session is gone; nothing further is accepted.
        assert!(stream.write(&bytes).is_err());
    }

    #[test]
    fn test_abort_rejects_followups_with_the_same_reason() {
        let bytes = sample_bytes();
        let mut engine = test_engine();
        let mut stream = engine.open_document_stream("cancelled");
        stream.write(&bytes[..10]).unwrap();
        assert!(stream.bytes_consumed() > 0);

        stream.abort("scene switched away");
        assert_eq!(stream.session_id(), NOT_LOADING);
        assert_eq!(stream.bytes_consumed(), 0);
        assert_eq!(stream.result_index(), NO_SCENE_PRODUCED);

        let expected = StreamError::Aborted("scene switched away".into());
        assert_eq!(stream.write(&bytes).unwrap_err(), expected);
        match stream.close(&mut engine).unwrap_err() {
            EngineError::Stream(error) => assert_eq!(error, expected),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_concurrent_sessions_do_not_share_buffers() {
        let bytes = sample_bytes();
        let mut engine = test_engine();
        let mut first = engine.open_document_stream("first");
        let mut second = engine.open_document_stream("second");
        assert!(second.session_id() > first.session_id());

        // Interleave fragments across the two sessions.
        let mid = bytes.len() / 2;
        first.write(&bytes[..mid]).unwrap();
        second.write(&bytes[..mid]).unwrap();
        first.write(&bytes[mid..]).unwrap();
        second.write(&bytes[mid..]).unwrap();

        let a = first.close(&mut engine).unwrap();
        let b = second.close(&mut engine).unwrap();
        assert_ne!(a, b);
        assert!(b.index() > a.index());
        assert_eq!(engine.scene(a).unwrap().object_count(), 2);
        assert_eq!(engine.scene(b).unwrap().object_count(), 2);
    }
}
