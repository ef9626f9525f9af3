use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use reel_media::tracks::AudioSources;
use reel_recording::AudioLevels;
use tokio::{sync::watch, task::JoinHandle};

const FLOOR_DB: f64 = -60.0;
const CELLS: usize = 10;

/// Recording spinner with elapsed time and live input levels.
pub struct LevelMeter {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl LevelMeter {
    pub fn start(mut levels: watch::Receiver<AudioLevels>, sources: AudioSources) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.red} REC {elapsed_precise} {msg}")
        {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));

        let task = tokio::spawn({
            let bar = bar.clone();
            async move {
                bar.set_message(format_levels(&AudioLevels::default(), sources));
                while levels.changed().await.is_ok() {
                    let current = *levels.borrow_and_update();
                    bar.set_message(format_levels(&current, sources));
                }
            }
        });

        Self { bar, task }
    }

    pub fn println(&self, line: impl AsRef<str>) {
        self.bar.println(line);
    }

    pub fn finish(self) {
        self.task.abort();
        self.bar.finish_and_clear();
    }
}

pub fn format_levels(levels: &AudioLevels, sources: AudioSources) -> String {
    let mut parts = vec![];
    if sources.microphone {
        parts.push(format!("mic {}", format_level(levels.microphone)));
    }
    if sources.system_audio {
        parts.push(format!("sys {}", format_level(levels.system_audio)));
    }
    parts.join("  ")
}

fn format_level(db: f64) -> String {
    let fraction = ((db - FLOOR_DB) / -FLOOR_DB).clamp(0.0, 1.0);
    let lit = (fraction * CELLS as f64).round() as usize;

    let cells: String = (0..CELLS)
        .map(|cell| if cell < lit { '#' } else { '.' })
        .collect();

    if db <= FLOOR_DB {
        format!("[{cells}]   -inf dB")
    } else {
        format!("[{cells}] {db:>6.1} dB")
    }
}
