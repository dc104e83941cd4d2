use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use story_reader::{
    audio::device::DeviceContext,
    config::Settings,
    services::gemini::GeminiClient,
    session::{PlayStep, ReaderSession},
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let settings = match std::env::var("STORY_READER_SETTINGS") {
        Ok(path) => Settings::load(Path::new(&path))?,
        Err(_) => Settings::default(),
    };

    let mut text = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if text.trim().is_empty() {
        std::io::stdin().read_to_string(&mut text)?;
    }

    let client = GeminiClient::from_env()?;
    let mut session = ReaderSession::new(settings, DeviceContext::open);
    let preload_start = Instant::now();
    let preloaded = session.preload_on_startup(&client);
    if preloaded > 0 {
        println!("Preloaded {preloaded} voices in {:.2?}", preload_start.elapsed());
    }
    session.set_text(text);

    let generate_start = Instant::now();
    match session.handle_play(&client) {
        Ok(PlayStep::Started { .. }) => {}
        Ok(step) => println!("Nothing to play ({step:?})"),
        Err(e) => {
            println!("{}", e.user_message());
            if let Some(suggestion) = session.suggestion() {
                println!("Suggested rewrite:\n{suggestion}");
            }
            return Ok(());
        }
    }
    println!(
        "Generated {:.2}s of audio in {:.2?}, title \"{}\"",
        session.duration(),
        generate_start.elapsed(),
        session.title()
    );

    loop {
        let frame = session.tick();
        if !frame.playing {
            break;
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    let path = session.download_to(&PathBuf::from("."))?;
    println!("Saved to {}", path.display());
    Ok(())
}
