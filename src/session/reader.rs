use std::path::{Path, PathBuf};

use crate::audio::{decode_base64, pcm16_to_buffer, AudioContext, AudioError, SharedContext};
use crate::config::{clamp_temperature, Settings};
use crate::playback::{PlaybackController, PlaybackEvent};
use crate::services::{RewriteService, ServiceError, SpeechService, TitleService};
use crate::text::{expand_acronyms, sanitize_title};
use crate::RawAudio;

use super::cache::VoiceCache;
use super::error::ReaderError;

/// A generation request issued by [`ReaderSession::begin_play`].
///
/// Carries the input epoch it was issued under. Hand the service result back
/// through [`ReaderSession::complete_generation`]; if the text, voice or
/// temperature changed in the meantime the result is not played.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationTicket {
    epoch: u64,
    text: String,
    prompt: String,
    voice: String,
    temperature: f32,
}

impl GenerationTicket {
    /// Text to send to the speech service (acronyms expanded).
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// The text as the user typed it.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Voice to generate with.
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Temperature to generate with.
    pub fn temperature(&self) -> f32 {
        self.temperature
    }
}

/// A rewrite request following a content-policy rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteTicket {
    epoch: u64,
    text: String,
}

impl RewriteTicket {
    /// The rejected text to rewrite.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A background title request for freshly generated audio.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleTicket {
    epoch: u64,
    text: String,
}

impl TitleTicket {
    /// The text to summarize into a title.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// What a play press did.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayStep {
    /// Audio was playing; the press stopped it.
    Stopped,
    /// Loaded audio continued from the stored offset.
    Resumed,
    /// New audio started from the beginning. Fulfil the title request, if
    /// any, through [`ReaderSession::complete_title`].
    Started { title: Option<TitleTicket> },
    /// Speech must be generated. Call the service and pass the result to
    /// [`ReaderSession::complete_generation`].
    Generate(GenerationTicket),
    /// A generation request is already in flight.
    Busy,
    /// The result belonged to a superseded request and was not played.
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
enum RewriteState {
    Idle,
    InProgress { epoch: u64 },
    Suggested(String),
}

/// Snapshot for one display refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackFrame {
    pub position: f64,
    pub duration: f64,
    pub playing: bool,
    /// The scrub bar is usable only once audio is loaded.
    pub scrub_enabled: bool,
    /// Playback reached the end during this frame.
    pub ended: bool,
}

/// State behind the read-aloud screen.
///
/// Owns the input (text, voice, temperature), the generated audio, the
/// playback controller, the voice cache and the shared audio context.
/// Generation is split into a request half ([`begin_play`](Self::begin_play))
/// and a completion half ([`complete_generation`](Self::complete_generation))
/// so the network call can run anywhere; [`handle_play`](Self::handle_play)
/// drives both against a backend in one call.
pub struct ReaderSession<C: AudioContext> {
    settings: Settings,
    context: SharedContext<C>,
    controller: PlaybackController,
    cache: VoiceCache,
    text: String,
    voice: String,
    temperature: f32,
    title: String,
    audio: Option<RawAudio>,
    /// Bumped whenever text, voice or temperature changes.
    input_epoch: u64,
    loading: bool,
    error: Option<ReaderError>,
    rewrite: RewriteState,
}

impl<C: AudioContext> ReaderSession<C> {
    /// Create a session. The audio context is built by `factory` on the
    /// first play and reused afterwards.
    pub fn new<F>(settings: Settings, factory: F) -> Self
    where
        F: FnMut() -> Result<C, AudioError> + 'static,
    {
        Self::with_shared_context(settings, SharedContext::new(factory))
    }

    /// Create a session around an existing context holder.
    pub fn with_shared_context(settings: Settings, context: SharedContext<C>) -> Self {
        let controller = PlaybackController::new(settings.playback_rate, settings.pitch_cents);
        Self {
            voice: settings.voice.clone(),
            temperature: clamp_temperature(settings.temperature),
            title: settings.fallback_title.clone(),
            settings,
            context,
            controller,
            cache: VoiceCache::new(),
            text: String::new(),
            audio: None,
            input_epoch: 0,
            loading: false,
            error: None,
            rewrite: RewriteState::Idle,
        }
    }

    /// Settings the session was created with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Story text as typed.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Selected voice id.
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Generation temperature, 0.0–2.0.
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Filename stem for downloads.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The error shown inline, if any.
    pub fn error(&self) -> Option<&ReaderError> {
        self.error.as_ref()
    }

    /// The inline message for the current error.
    pub fn error_message(&self) -> Option<&'static str> {
        self.error.as_ref().map(ReaderError::user_message)
    }

    /// A generation request is in flight.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Audio is playing right now.
    pub fn is_playing(&self) -> bool {
        self.controller.is_playing()
    }

    /// A rewrite of rejected text is pending.
    pub fn is_rewriting(&self) -> bool {
        matches!(self.rewrite, RewriteState::InProgress { .. })
    }

    /// The rewritten text on offer, once the rewrite has finished.
    pub fn suggestion(&self) -> Option<&str> {
        match &self.rewrite {
            RewriteState::Suggested(text) => Some(text),
            _ => None,
        }
    }

    /// Length of the loaded audio in seconds; zero when none is loaded.
    pub fn duration(&self) -> f64 {
        self.controller.duration()
    }

    /// Last reported playback position in seconds.
    pub fn position(&self) -> f64 {
        self.controller.position()
    }

    /// Whether the scrub bar accepts input.
    pub fn scrub_enabled(&self) -> bool {
        self.duration() > 0.0
    }

    /// Speed multiplier.
    pub fn playback_rate(&self) -> f32 {
        self.controller.rate()
    }

    /// Pitch shift in cents.
    pub fn pitch(&self) -> f32 {
        self.controller.detune()
    }

    /// Raw audio of the last successful generation.
    pub fn audio(&self) -> Option<&RawAudio> {
        self.audio.as_ref()
    }

    /// The underlying playback controller.
    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    /// Default-phrase audio cached per voice.
    pub fn cache(&self) -> &VoiceCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut VoiceCache {
        &mut self.cache
    }

    /// The audio context, once the first play created it.
    pub fn context(&self) -> Option<&C> {
        self.context.get()
    }

    /// Mutable access to the audio context, once created.
    pub fn context_mut(&mut self) -> Option<&mut C> {
        self.context.get_mut()
    }

    /// Replace the story text. A change resets the session.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text != self.text {
            self.text = text;
            self.reset_for_new_input();
        }
    }

    /// Select a voice. A change resets the session.
    pub fn set_voice(&mut self, voice: impl Into<String>) {
        let voice = voice.into();
        if voice != self.voice {
            if self.settings.voice_profile(&voice).is_none() {
                log::warn!("Voice {voice} is not in the configured voice list");
            }
            self.voice = voice;
            self.reset_for_new_input();
        }
    }

    /// Set the generation temperature. A change resets the session.
    pub fn set_temperature(&mut self, temperature: f32) {
        let temperature = clamp_temperature(temperature);
        if temperature != self.temperature {
            self.temperature = temperature;
            self.reset_for_new_input();
        }
    }

    /// Invalidate everything derived from the current input.
    ///
    /// Stops playback, drops the generated audio and decoded buffer, zeroes
    /// duration and position, restores the fallback title and orphans any
    /// in-flight generation, rewrite or title request.
    pub fn reset_for_new_input(&mut self) {
        self.input_epoch += 1;
        self.discard_audio();
        self.title = self.settings.fallback_title.clone();
        self.loading = false;
        if self.is_rewriting() {
            self.rewrite = RewriteState::Idle;
        }
        log::debug!("Input changed, session reset (epoch {})", self.input_epoch);
    }

    fn discard_audio(&mut self) {
        match self.context.get_mut() {
            Some(ctx) => self.controller.clear(ctx),
            None => self.controller.reset_detached(),
        }
        self.audio = None;
    }

    /// Speed multiplier, applied to live playback immediately.
    pub fn set_playback_rate(&mut self, rate: f32) -> Result<(), ReaderError> {
        match self.context.get_mut() {
            Some(ctx) => self.controller.set_rate(ctx, rate)?,
            None => self.controller.store_rate(rate),
        }
        Ok(())
    }

    /// Pitch in cents, applied to live playback immediately.
    pub fn set_pitch(&mut self, cents: f32) -> Result<(), ReaderError> {
        match self.context.get_mut() {
            Some(ctx) => self.controller.set_detune(ctx, cents)?,
            None => self.controller.store_detune(cents),
        }
        Ok(())
    }

    /// Scrub to `t` seconds. While stopped this sets where play resumes.
    pub fn seek(&mut self, t: f64) -> Result<(), ReaderError> {
        if let Some(ctx) = self.context.get_mut() {
            self.controller.seek(ctx, t)?;
        }
        Ok(())
    }

    /// Stop playback, keeping the position for the next play.
    pub fn stop(&mut self) {
        if let Some(ctx) = self.context.get_mut() {
            self.controller.stop(ctx);
        }
    }

    /// Advance progress for one display refresh.
    pub fn tick(&mut self) -> PlaybackFrame {
        let mut ended = false;
        if let Some(ctx) = self.context.get_mut() {
            for event in self.controller.poll(ctx) {
                if let PlaybackEvent::Ended { duration } = event {
                    log::info!("Finished reading ({duration:.2}s)");
                    ended = true;
                }
            }
        }
        PlaybackFrame {
            position: self.position(),
            duration: self.duration(),
            playing: self.is_playing(),
            scrub_enabled: self.scrub_enabled(),
            ended,
        }
    }

    /// React to the play button.
    ///
    /// Stops live playback, resumes loaded audio, plays a cached default
    /// phrase, or returns a [`GenerationTicket`] for new speech.
    pub fn begin_play(&mut self) -> Result<PlayStep, ReaderError> {
        if self.loading {
            return Ok(PlayStep::Busy);
        }
        if self.controller.is_playing() {
            self.stop();
            return Ok(PlayStep::Stopped);
        }
        if self.controller.has_buffer() {
            if let Err(e) = self.resume() {
                return Err(self.fail(e));
            }
            return Ok(PlayStep::Resumed);
        }
        if self.text.trim().is_empty() {
            return Err(self.fail(ReaderError::InputValidation));
        }

        self.error = None;
        self.rewrite = RewriteState::Idle;
        self.title = self.settings.fallback_title.clone();

        if let Some(audio) = self.cached_default_phrase() {
            log::info!("Playing cached default phrase for voice {}", self.voice);
            if let Err(e) = self.play_audio(audio) {
                self.discard_audio();
                return Err(self.fail(e));
            }
            return Ok(PlayStep::Started { title: None });
        }

        self.loading = true;
        log::info!(
            "Requesting speech: {} chars, voice {}, temperature {:.1}",
            self.text.chars().count(),
            self.voice,
            self.temperature
        );
        Ok(PlayStep::Generate(GenerationTicket {
            epoch: self.input_epoch,
            prompt: expand_acronyms(&self.text).into_owned(),
            text: self.text.clone(),
            voice: self.voice.clone(),
            temperature: self.temperature,
        }))
    }

    /// Apply the speech service's answer to a generation ticket.
    pub fn complete_generation(
        &mut self,
        ticket: GenerationTicket,
        result: Result<String, ServiceError>,
    ) -> Result<PlayStep, ReaderError> {
        if ticket.epoch != self.input_epoch {
            log::debug!("Discarding speech for superseded input (epoch {})", ticket.epoch);
            if let Ok(payload) = &result {
                self.cache_default_phrase(&ticket, payload);
            }
            return Ok(PlayStep::Discarded);
        }
        self.loading = false;

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                let err = ReaderError::from_generation(e);
                if err.triggers_rewrite() {
                    self.rewrite = RewriteState::InProgress { epoch: ticket.epoch };
                }
                return Err(self.fail(err));
            }
        };

        let audio = match decode_base64(&payload) {
            Ok(bytes) => RawAudio::new(bytes),
            Err(e) => return Err(self.fail(e.into())),
        };
        if self.is_default_phrase(&ticket.voice, &ticket.text) && !audio.data.is_empty() {
            self.cache.put(ticket.voice.clone(), audio.clone());
        }

        if let Err(e) = self.play_audio(audio) {
            self.discard_audio();
            return Err(self.fail(e));
        }

        Ok(PlayStep::Started {
            title: Some(TitleTicket {
                epoch: ticket.epoch,
                text: ticket.text,
            }),
        })
    }

    /// The rewrite to request after a content-policy rejection, if one is
    /// pending for the current input.
    pub fn rewrite_request(&self) -> Option<RewriteTicket> {
        match self.rewrite {
            RewriteState::InProgress { epoch } if epoch == self.input_epoch => {
                Some(RewriteTicket {
                    epoch,
                    text: self.text.clone(),
                })
            }
            _ => None,
        }
    }

    pub fn complete_rewrite(
        &mut self,
        ticket: RewriteTicket,
        result: Result<String, ServiceError>,
    ) -> Result<(), ReaderError> {
        let pending = matches!(
            self.rewrite,
            RewriteState::InProgress { epoch } if epoch == ticket.epoch
        );
        if !pending || ticket.epoch != self.input_epoch {
            log::debug!("Discarding rewrite for superseded input");
            return Ok(());
        }

        match result.map(|text| text.trim().to_string()) {
            Ok(text) if !text.is_empty() => {
                self.rewrite = RewriteState::Suggested(text);
                Ok(())
            }
            Ok(_) => {
                self.rewrite = RewriteState::Idle;
                Err(self.fail(ReaderError::RewriteFailure(
                    ServiceError::MissingText.to_string(),
                )))
            }
            Err(e) => {
                self.rewrite = RewriteState::Idle;
                Err(self.fail(ReaderError::RewriteFailure(e.to_string())))
            }
        }
    }

    /// Replace the text with the offered rewrite and clear the error.
    pub fn accept_suggestion(&mut self) -> bool {
        let RewriteState::Suggested(text) =
            std::mem::replace(&mut self.rewrite, RewriteState::Idle)
        else {
            return false;
        };
        self.set_text(text);
        self.error = None;
        true
    }

    /// Apply a title result. Failures fall back to the default stem.
    pub fn complete_title(&mut self, ticket: TitleTicket, result: Result<String, ServiceError>) {
        if ticket.epoch != self.input_epoch {
            log::debug!("Discarding title for superseded input");
            return;
        }
        let title = match result {
            Ok(raw) => sanitize_title(&raw),
            Err(e) => {
                let err = ReaderError::TitleGeneration(e.to_string());
                log::warn!("{err}; using the default title");
                None
            }
        };
        self.title = title.unwrap_or_else(|| self.settings.fallback_title.clone());
    }

    /// Run a full play press against `backend`: generation, then the title,
    /// or the rewrite suggestion if the text was rejected.
    pub fn handle_play<B>(&mut self, backend: &B) -> Result<PlayStep, ReaderError>
    where
        B: SpeechService + RewriteService + TitleService + ?Sized,
    {
        let ticket = match self.begin_play()? {
            PlayStep::Generate(ticket) => ticket,
            step => return Ok(step),
        };

        let result = backend.generate_speech(ticket.prompt(), ticket.temperature(), ticket.voice());
        match self.complete_generation(ticket, result) {
            Ok(PlayStep::Started { title: Some(title) }) => {
                let result = backend.generate_title(title.text());
                self.complete_title(title, result);
                Ok(PlayStep::Started { title: None })
            }
            Ok(step) => Ok(step),
            Err(err) => {
                if let Some(rewrite) = self.rewrite_request() {
                    let result = backend.rewrite(rewrite.text());
                    if let Err(e) = self.complete_rewrite(rewrite, result) {
                        log::warn!("No rewrite suggestion: {e}");
                    }
                }
                Err(err)
            }
        }
    }

    /// Generate and cache the default phrase of every configured voice.
    pub fn preload_voices<S: SpeechService + ?Sized>(&mut self, speech: &S) -> usize {
        self.cache
            .preload(speech, &self.settings.voices, self.temperature)
    }

    /// Preload voices when the settings enable it. Call once at startup.
    pub fn preload_on_startup<S: SpeechService + ?Sized>(&mut self, speech: &S) -> usize {
        if !self.settings.preload_voices {
            log::debug!("Voice preload disabled");
            return 0;
        }
        self.preload_voices(speech)
    }

    /// Download is offered once audio exists and nothing is playing or loading.
    pub fn can_download(&self) -> bool {
        self.audio.is_some() && !self.is_playing() && !self.loading
    }

    /// `<title>.wav`
    pub fn download_file_name(&self) -> String {
        format!("{}.wav", self.title)
    }

    /// The last generated audio as a WAV file.
    pub fn download_bytes(&self) -> Result<Vec<u8>, ReaderError> {
        let audio = self.audio.as_ref().ok_or(ReaderError::NoAudio)?;
        audio
            .to_wav_bytes()
            .map_err(|e| ReaderError::Export(e.to_string()))
    }

    /// Write the WAV file into `dir` and return its path.
    pub fn download_to(&self, dir: &Path) -> Result<PathBuf, ReaderError> {
        let audio = self.audio.as_ref().ok_or(ReaderError::NoAudio)?;
        let path = dir.join(self.download_file_name());
        audio
            .write_wav(&path)
            .map_err(|e| ReaderError::Export(e.to_string()))?;
        log::info!("Saved {}", path.display());
        Ok(path)
    }

    fn resume(&mut self) -> Result<(), ReaderError> {
        let ctx = self.context.ensure_running()?;
        self.controller.resume(ctx)?;
        Ok(())
    }

    fn play_audio(&mut self, audio: RawAudio) -> Result<(), ReaderError> {
        let ctx = self.context.ensure_running()?;
        let buffer = pcm16_to_buffer(ctx, &audio.data, audio.sample_rate, audio.channels)?;
        self.controller.load(ctx, buffer);
        self.controller.start(ctx, 0.0)?;
        self.audio = Some(audio);
        Ok(())
    }

    fn is_default_phrase(&self, voice: &str, text: &str) -> bool {
        self.settings.default_phrase(voice) == Some(text)
    }

    fn cached_default_phrase(&self) -> Option<RawAudio> {
        if !self.is_default_phrase(&self.voice, &self.text) {
            return None;
        }
        self.cache.get(&self.voice).cloned()
    }

    /// Keep a superseded default-phrase result for later.
    fn cache_default_phrase(&mut self, ticket: &GenerationTicket, payload: &str) {
        if !self.is_default_phrase(&ticket.voice, &ticket.text) || self.cache.contains(&ticket.voice)
        {
            return;
        }
        match decode_base64(payload) {
            Ok(bytes) if !bytes.is_empty() => {
                self.cache.put(ticket.voice.clone(), RawAudio::new(bytes));
            }
            Ok(_) => {}
            Err(e) => log::debug!("Not caching malformed payload for {}: {e}", ticket.voice),
        }
    }

    fn fail(&mut self, err: ReaderError) -> ReaderError {
        match &err {
            ReaderError::InputValidation => log::debug!("{err}"),
            _ => log::warn!("{err}"),
        }
        self.loading = false;
        self.error = Some(err.clone());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::{PlayStep, ReaderSession};
    use crate::audio::offline::{NodeOp, OfflineContext};
    use crate::audio::AudioError;
    use crate::config::Settings;
    use crate::services::{RewriteService, ServiceError, SpeechService, TitleService};
    use crate::session::ReaderError;
    use crate::RawAudio;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use std::cell::{Cell, RefCell};

    struct FakeBackend {
        speech: RefCell<Result<String, ServiceError>>,
        rewrite: Result<String, ServiceError>,
        title: Result<String, ServiceError>,
        prompts: RefCell<Vec<(String, f32, String)>>,
        rewrite_calls: Cell<usize>,
        title_calls: Cell<usize>,
    }

    impl FakeBackend {
        fn speaking(seconds: f64) -> Self {
            Self {
                speech: RefCell::new(Ok(pcm_base64(seconds))),
                rewrite: Ok("A gentle tale about friendship.".to_string()),
                title: Ok("The Lost Key".to_string()),
                prompts: RefCell::new(Vec::new()),
                rewrite_calls: Cell::new(0),
                title_calls: Cell::new(0),
            }
        }

        fn failing(err: ServiceError) -> Self {
            let backend = Self::speaking(0.0);
            *backend.speech.borrow_mut() = Err(err);
            backend
        }

        fn speech_calls(&self) -> usize {
            self.prompts.borrow().len()
        }
    }

    impl SpeechService for FakeBackend {
        fn generate_speech(
            &self,
            text: &str,
            temperature: f32,
            voice: &str,
        ) -> Result<String, ServiceError> {
            self.prompts
                .borrow_mut()
                .push((text.to_string(), temperature, voice.to_string()));
            self.speech.borrow().clone()
        }
    }

    impl RewriteService for FakeBackend {
        fn rewrite(&self, _text: &str) -> Result<String, ServiceError> {
            self.rewrite_calls.set(self.rewrite_calls.get() + 1);
            self.rewrite.clone()
        }
    }

    impl TitleService for FakeBackend {
        fn generate_title(&self, _text: &str) -> Result<String, ServiceError> {
            self.title_calls.set(self.title_calls.get() + 1);
            self.title.clone()
        }
    }

    /// Silent 24 kHz mono PCM, base64 encoded.
    fn pcm_base64(seconds: f64) -> String {
        STANDARD.encode(vec![0u8; (seconds * 48_000.0) as usize])
    }

    fn session() -> ReaderSession<OfflineContext> {
        ReaderSession::new(Settings::default(), || Ok(OfflineContext::new()))
    }

    fn advance(session: &mut ReaderSession<OfflineContext>, secs: f64) {
        session
            .context_mut()
            .expect("context exists after first play")
            .advance(secs);
    }

    fn default_phrase(session: &ReaderSession<OfflineContext>, voice: &str) -> String {
        session
            .settings()
            .default_phrase(voice)
            .expect("configured voice")
            .to_string()
    }

    #[test]
    fn empty_text_is_rejected_without_a_network_call() {
        let backend = FakeBackend::speaking(1.0);
        let mut session = session();
        session.set_text("   \n");

        let err = session.handle_play(&backend).expect_err("blank text");
        assert_eq!(err, ReaderError::InputValidation);
        assert_eq!(session.error_message(), Some("Please enter a story to read."));
        assert_eq!(backend.speech_calls(), 0);
        assert!(!session.is_loading());
        assert!(session.context().is_none());
    }

    #[test]
    fn one_second_payload_plays_from_zero() {
        let backend = FakeBackend::speaking(1.0);
        let mut session = session();
        session.set_text("Once upon a time");

        let step = session.handle_play(&backend).expect("plays");
        assert_eq!(step, PlayStep::Started { title: None });
        assert_eq!(session.duration(), 1.0);
        assert_eq!(session.position(), 0.0);
        assert!(session.is_playing());
        assert!(session.scrub_enabled());
        assert_eq!(session.title(), "the-lost-key");
        assert_eq!(backend.title_calls.get(), 1);
    }

    #[test]
    fn prompt_has_acronyms_expanded() {
        let backend = FakeBackend::speaking(1.0);
        let mut session = session();
        session.set_text("AITA for this?");
        session.handle_play(&backend).expect("plays");

        let prompts = backend.prompts.borrow();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].0.starts_with("Am I the A-hole"));
        assert_eq!(prompts[0].1, 0.3);
        assert_eq!(prompts[0].2, "Charon");
    }

    #[test]
    fn stop_and_play_again_resumes_where_it_stopped() {
        let backend = FakeBackend::speaking(10.0);
        let mut session = session();
        session.set_text("Once upon a time");
        session.handle_play(&backend).expect("plays");

        advance(&mut session, 2.3);
        let frame = session.tick();
        assert!((frame.position - 2.3).abs() < 1e-9);

        assert_eq!(session.handle_play(&backend), Ok(PlayStep::Stopped));
        assert!(!session.is_playing());
        assert!((session.position() - 2.3).abs() < 1e-9);

        assert_eq!(session.handle_play(&backend), Ok(PlayStep::Resumed));
        let ctx = session.context().expect("context");
        match ctx.ops().last() {
            Some(NodeOp::Start(_, offset)) => assert!((offset - 2.3).abs() < 1e-9),
            other => panic!("expected a start, got {other:?}"),
        }
        assert_eq!(ctx.active_sources(), 1);
        assert_eq!(backend.speech_calls(), 1);
    }

    #[test]
    fn natural_end_stops_at_full_duration() {
        let backend = FakeBackend::speaking(1.0);
        let mut session = session();
        session.set_text("Short");
        session.handle_play(&backend).expect("plays");

        advance(&mut session, 1.5);
        let frame = session.tick();
        assert!(frame.ended);
        assert!(!frame.playing);
        assert_eq!(frame.position, 1.0);
        assert!(session.can_download());
    }

    #[test]
    fn prohibited_content_offers_a_rewrite() {
        let backend = FakeBackend::failing(ServiceError::ProhibitedContent {
            reason: "HARM".to_string(),
        });
        let mut session = session();
        session.set_text("Something dark");

        let err = session.handle_play(&backend).expect_err("blocked");
        assert!(matches!(err, ReaderError::ProhibitedContent { .. }));
        assert_eq!(backend.rewrite_calls.get(), 1);
        assert!(!session.is_rewriting());
        assert_eq!(session.suggestion(), Some("A gentle tale about friendship."));
        assert!(session.error().is_some());

        assert!(session.accept_suggestion());
        assert_eq!(session.text(), "A gentle tale about friendship.");
        assert!(session.error().is_none());
        assert!(session.suggestion().is_none());
    }

    #[test]
    fn rewrite_flow_step_by_step() {
        let mut session = session();
        session.set_text("Something dark");

        let Ok(PlayStep::Generate(ticket)) = session.begin_play() else {
            panic!("expected a generation request");
        };
        assert!(session.is_loading());
        let blocked = Err(ServiceError::ProhibitedContent {
            reason: "HARM".to_string(),
        });
        assert!(session.complete_generation(ticket, blocked).is_err());
        assert!(session.is_rewriting());
        assert!(!session.is_loading());

        let rewrite = session.rewrite_request().expect("rewrite pending");
        assert_eq!(rewrite.text(), "Something dark");
        session
            .complete_rewrite(rewrite, Ok("Something bright".to_string()))
            .expect("suggestion");
        assert_eq!(session.suggestion(), Some("Something bright"));
    }

    #[test]
    fn failed_rewrite_shows_its_own_message() {
        let mut backend = FakeBackend::failing(ServiceError::ProhibitedContent {
            reason: "HARM".to_string(),
        });
        backend.rewrite = Err(ServiceError::RewriteBlocked {
            reason: "SAFETY".to_string(),
        });
        let mut session = session();
        session.set_text("Something dark");

        assert!(session.handle_play(&backend).is_err());
        assert!(matches!(
            session.error(),
            Some(ReaderError::RewriteFailure(_))
        ));
        assert!(!session.is_rewriting());
        assert!(session.suggestion().is_none());
    }

    #[test]
    fn generic_failure_does_not_start_a_rewrite() {
        let backend = FakeBackend::failing(ServiceError::Request("timeout".to_string()));
        let mut session = session();
        session.set_text("Once upon a time");

        let err = session.handle_play(&backend).expect_err("fails");
        assert!(matches!(err, ReaderError::GenerationFailure(_)));
        assert_eq!(backend.rewrite_calls.get(), 0);
        assert!(!session.is_loading());
        assert!(!session.is_playing());
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let backend = FakeBackend::speaking(0.0);
        *backend.speech.borrow_mut() = Ok("not base64!!".to_string());
        let mut session = session();
        session.set_text("Once upon a time");

        let err = session.handle_play(&backend).expect_err("bad payload");
        assert!(matches!(err, ReaderError::Decode(_)));
        assert!(session.audio().is_none());
        assert_eq!(session.duration(), 0.0);
    }

    #[test]
    fn empty_payload_is_a_conversion_error() {
        let backend = FakeBackend::speaking(0.0);
        let mut session = session();
        session.set_text("Once upon a time");

        let err = session.handle_play(&backend).expect_err("no samples");
        assert!(matches!(err, ReaderError::AudioConversion(_)));
        assert!(!session.can_download());
    }

    #[test]
    fn cached_default_phrase_skips_generation() {
        let backend = FakeBackend::speaking(1.0);
        let mut session = session();
        session
            .cache_mut()
            .put("Charon", RawAudio::new(vec![0u8; 4_800]));
        let phrase = default_phrase(&session, "Charon");
        session.set_text(phrase);

        let step = session.handle_play(&backend).expect("plays");
        assert_eq!(step, PlayStep::Started { title: None });
        assert_eq!(backend.speech_calls(), 0);
        assert!(session.is_playing());
        assert!((session.duration() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn default_phrase_is_cached_on_first_generation() {
        let backend = FakeBackend::speaking(1.0);
        let mut session = session();
        let phrase = default_phrase(&session, "Charon");
        session.set_text(phrase.clone());
        session.handle_play(&backend).expect("plays");
        assert!(session.cache().contains("Charon"));

        session.set_text("something else");
        session.set_text(phrase);
        session.handle_play(&backend).expect("plays from cache");
        assert_eq!(backend.speech_calls(), 1);
    }

    #[test]
    fn temperature_change_discards_loaded_audio() {
        let backend = FakeBackend::speaking(3.0);
        let mut session = session();
        session.set_text("Once upon a time");
        session.handle_play(&backend).expect("plays");
        assert_eq!(session.duration(), 3.0);

        session.set_temperature(0.9);
        assert_eq!(session.duration(), 0.0);
        assert_eq!(session.position(), 0.0);
        assert!(!session.scrub_enabled());
        assert!(!session.is_playing());
        assert!(session.audio().is_none());
        assert_eq!(session.title(), "story");
        assert_eq!(session.context().map(|c| c.active_sources()), Some(0));

        session.handle_play(&backend).expect("regenerates");
        assert_eq!(backend.speech_calls(), 2);
        assert_eq!(backend.prompts.borrow()[1].1, 0.9);
    }

    #[test]
    fn unchanged_values_do_not_reset() {
        let backend = FakeBackend::speaking(3.0);
        let mut session = session();
        session.set_text("Once upon a time");
        session.handle_play(&backend).expect("plays");

        session.set_text("Once upon a time");
        session.set_voice("Charon");
        session.set_temperature(0.3);
        assert!(session.is_playing());
        assert_eq!(session.duration(), 3.0);
    }

    #[test]
    fn stale_generation_is_not_played() {
        let mut session = session();
        session.set_text("First draft");
        let Ok(PlayStep::Generate(ticket)) = session.begin_play() else {
            panic!("expected a generation request");
        };

        session.set_text("Second draft");
        assert!(!session.is_loading());
        let step = session
            .complete_generation(ticket, Ok(pcm_base64(1.0)))
            .expect("discarded quietly");
        assert_eq!(step, PlayStep::Discarded);
        assert!(!session.is_playing());
        assert!(session.audio().is_none());
        assert_eq!(session.duration(), 0.0);
    }

    #[test]
    fn stale_default_phrase_still_fills_the_cache() {
        let mut session = session();
        let phrase = default_phrase(&session, "Kore");
        session.set_voice("Kore");
        session.set_text(phrase);
        let Ok(PlayStep::Generate(ticket)) = session.begin_play() else {
            panic!("expected a generation request");
        };

        session.set_voice("Puck");
        let step = session
            .complete_generation(ticket, Ok(pcm_base64(0.5)))
            .expect("discarded");
        assert_eq!(step, PlayStep::Discarded);
        assert!(session.cache().contains("Kore"));
        assert!(!session.is_playing());
    }

    #[test]
    fn second_press_while_loading_is_busy() {
        let mut session = session();
        session.set_text("Once upon a time");
        assert!(matches!(session.begin_play(), Ok(PlayStep::Generate(_))));
        assert_eq!(session.begin_play(), Ok(PlayStep::Busy));
    }

    #[test]
    fn title_failure_falls_back_to_default() {
        let mut backend = FakeBackend::speaking(1.0);
        backend.title = Err(ServiceError::MissingText);
        let mut session = session();
        session.set_text("Once upon a time");

        session.handle_play(&backend).expect("plays");
        assert_eq!(session.title(), "story");
        assert!(session.error().is_none());
        assert_eq!(session.download_file_name(), "story.wav");
    }

    #[test]
    fn unusable_title_falls_back_to_default() {
        let mut backend = FakeBackend::speaking(1.0);
        backend.title = Ok("!!!".to_string());
        let mut session = session();
        session.set_text("Once upon a time");

        session.handle_play(&backend).expect("plays");
        assert_eq!(session.title(), "story");
    }

    #[test]
    fn stale_title_is_ignored() {
        let mut session = session();
        session.set_text("Once upon a time");
        let Ok(PlayStep::Generate(ticket)) = session.begin_play() else {
            panic!("expected a generation request");
        };
        let Ok(PlayStep::Started { title: Some(title) }) =
            session.complete_generation(ticket, Ok(pcm_base64(1.0)))
        else {
            panic!("expected playback with a title request");
        };

        session.set_text("A different story");
        session.complete_title(title, Ok("Old Title".to_string()));
        assert_eq!(session.title(), "story");
    }

    #[test]
    fn download_uses_the_generated_title() {
        let backend = FakeBackend::speaking(0.5);
        let mut session = session();
        assert_eq!(session.download_bytes(), Err(ReaderError::NoAudio));

        session.set_text("Once upon a time");
        session.handle_play(&backend).expect("plays");
        assert!(!session.can_download());
        session.handle_play(&backend).expect("stops");
        assert!(session.can_download());

        assert_eq!(session.download_file_name(), "the-lost-key.wav");
        let bytes = session.download_bytes().expect("wav");
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(bytes.len(), 44 + 24_000);
    }

    #[test]
    fn download_to_writes_the_file() {
        let backend = FakeBackend::speaking(0.25);
        let mut session = session();
        session.set_text("Once upon a time");
        session.handle_play(&backend).expect("plays");

        let dir = std::env::temp_dir().join(format!("story-reader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = session.download_to(&dir).expect("writes");
        assert!(path.ends_with("the-lost-key.wav"));
        let reader = hound::WavReader::open(&path).expect("readable wav");
        assert_eq!(reader.duration(), 6_000);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn scrub_while_stopped_sets_resume_point() {
        let backend = FakeBackend::speaking(10.0);
        let mut session = session();
        session.set_text("Once upon a time");
        session.handle_play(&backend).expect("plays");
        session.handle_play(&backend).expect("stops");

        session.seek(7.5).expect("seeks");
        assert_eq!(session.position(), 7.5);
        assert!(!session.is_playing());

        assert_eq!(session.handle_play(&backend), Ok(PlayStep::Resumed));
        let ctx = session.context().expect("context");
        assert!(matches!(ctx.ops().last(), Some(NodeOp::Start(_, o)) if *o == 7.5));
    }

    #[test]
    fn rate_and_pitch_apply_to_live_playback() {
        let backend = FakeBackend::speaking(10.0);
        let mut session = session();
        session.set_playback_rate(1.5).expect("stored");
        session.set_text("Once upon a time");
        session.handle_play(&backend).expect("plays");

        let node = session.controller().active_node().expect("live source");
        assert_eq!(session.context().and_then(|c| c.playback_rate(node)), Some(1.5));

        session.set_pitch(-300.0).expect("live");
        assert_eq!(session.context().and_then(|c| c.detune(node)), Some(-300.0));
        assert_eq!(session.pitch(), -300.0);
    }

    #[test]
    fn context_is_created_once_and_resumed() {
        let created = std::rc::Rc::new(Cell::new(0));
        let counter = created.clone();
        let mut session: ReaderSession<OfflineContext> =
            ReaderSession::new(Settings::default(), move || {
                counter.set(counter.get() + 1);
                Ok(OfflineContext::new())
            });
        let backend = FakeBackend::speaking(1.0);

        session.set_text("One");
        session.handle_play(&backend).expect("plays");
        session.set_text("Two");
        session.handle_play(&backend).expect("plays");
        assert_eq!(created.get(), 1);
        assert!(session.is_playing());
    }

    #[test]
    fn missing_audio_device_is_reported() {
        let backend = FakeBackend::speaking(1.0);
        let mut session: ReaderSession<OfflineContext> =
            ReaderSession::new(Settings::default(), || Err(AudioError::NoDevice));
        session.set_text("Once upon a time");

        let err = session.handle_play(&backend).expect_err("no device");
        assert!(matches!(err, ReaderError::Playback(_)));
        assert!(!session.is_playing());
        assert!(!session.is_loading());
        assert!(session.audio().is_none());
    }

    #[test]
    fn preload_fills_every_voice() {
        let backend = FakeBackend::speaking(0.1);
        let mut session = session();
        assert_eq!(session.preload_voices(&backend), 6);
        assert_eq!(session.cache().len(), 6);
        assert_eq!(session.preload_voices(&backend), 0);
    }

    #[test]
    fn voice_change_discards_loaded_audio() {
        let backend = FakeBackend::speaking(3.0);
        let mut session = session();
        session.set_text("Once upon a time");
        session.handle_play(&backend).expect("plays");
        advance(&mut session, 1.0);
        session.tick();
        assert_eq!(session.title(), "the-lost-key");

        session.set_voice("Kore");
        assert!(!session.is_playing());
        assert_eq!(session.duration(), 0.0);
        assert_eq!(session.position(), 0.0);
        assert!(!session.scrub_enabled());
        assert!(session.audio().is_none());
        assert_eq!(session.title(), "story");
        assert_eq!(session.context().map(|c| c.active_sources()), Some(0));

        session.handle_play(&backend).expect("regenerates");
        assert_eq!(backend.prompts.borrow()[1].2, "Kore");
    }

    #[test]
    fn text_edit_discards_loaded_audio() {
        let backend = FakeBackend::speaking(3.0);
        let mut session = session();
        session.set_text("Once upon a time");
        session.handle_play(&backend).expect("plays");
        advance(&mut session, 1.0);
        session.tick();

        session.set_text("Once upon a time, again");
        assert!(!session.is_playing());
        assert_eq!(session.duration(), 0.0);
        assert_eq!(session.position(), 0.0);
        assert!(!session.scrub_enabled());
        assert!(!session.can_download());
        assert_eq!(session.title(), "story");
        assert_eq!(session.context().map(|c| c.active_sources()), Some(0));
    }

    #[test]
    fn startup_preload_follows_the_setting() {
        let backend = FakeBackend::speaking(0.1);
        let mut disabled = ReaderSession::new(
            Settings {
                preload_voices: false,
                ..Settings::default()
            },
            || Ok(OfflineContext::new()),
        );
        assert_eq!(disabled.preload_on_startup(&backend), 0);
        assert_eq!(backend.speech_calls(), 0);
        assert!(disabled.cache().is_empty());

        let mut enabled = session();
        assert_eq!(enabled.preload_on_startup(&backend), 6);
        assert_eq!(backend.speech_calls(), 6);
    }

    #[test]
    fn failed_seek_returns_to_stopped() {
        let backend = FakeBackend::speaking(10.0);
        let mut session = session();
        session.set_text("Once upon a time");
        session.handle_play(&backend).expect("plays");
        session.context_mut().expect("context").close();

        assert!(session.seek(5.0).is_err());
        assert!(!session.is_playing());
        assert!(session.can_download());
    }
}
