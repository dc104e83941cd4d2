use std::collections::HashMap;

use crate::audio::decode_base64;
use crate::config::VoiceProfile;
use crate::services::SpeechService;
use crate::RawAudio;

/// Generated audio of each voice's default phrase, keyed by voice id.
///
/// Entries are never evicted during a session.
#[derive(Debug, Default)]
pub struct VoiceCache {
    entries: HashMap<String, RawAudio>,
}

impl VoiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, voice: &str) -> Option<&RawAudio> {
        self.entries.get(voice)
    }

    pub fn put(&mut self, voice: impl Into<String>, audio: RawAudio) {
        let voice = voice.into();
        log::debug!(
            "Cached default phrase for voice {voice} ({:.2}s)",
            audio.duration_secs()
        );
        self.entries.insert(voice, audio);
    }

    pub fn contains(&self, voice: &str) -> bool {
        self.entries.contains_key(voice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Generate the default phrase of every voice not yet cached.
    ///
    /// Requests run one after another. A failure is logged and the next
    /// voice is tried. Returns how many voices were added.
    pub fn preload<S: SpeechService + ?Sized>(
        &mut self,
        service: &S,
        voices: &[VoiceProfile],
        temperature: f32,
    ) -> usize {
        let mut added = 0;
        for voice in voices {
            if self.contains(&voice.id) {
                continue;
            }
            let audio = service
                .generate_speech(&voice.default_phrase, temperature, &voice.id)
                .map_err(|e| e.to_string())
                .and_then(|payload| decode_base64(&payload).map_err(|e| e.to_string()));
            match audio {
                Ok(bytes) if !bytes.is_empty() => {
                    self.put(voice.id.clone(), RawAudio::new(bytes));
                    added += 1;
                }
                Ok(_) => log::warn!("Preload for voice {} returned no audio", voice.id),
                Err(e) => log::warn!("Failed to preload voice {}: {e}", voice.id),
            }
        }
        log::info!("Preloaded {added} of {} voices", voices.len());
        added
    }
}
