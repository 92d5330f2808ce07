#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use std::time::Duration;
use tune_queue::navigation::NavigationSettings;
use tune_queue::shuffle::ShuffleEngine;
use tune_queue::{LoopMode, NavigationController, TrackRef};

fuzz_target!(|data: &[u8]| {
    let settings = NavigationSettings {
        history_limit: 8,
        ..NavigationSettings::default()
    };
    let mut nav = NavigationController::new(settings, ShuffleEngine::seeded(0));

    for pair in data.chunks(2) {
        let op = pair[0];
        let arg = usize::from(pair.get(1).copied().unwrap_or(0) % 16);
        match op % 10 {
            0 => {
                let track = Arc::new(TrackRef::new(
                    format!("track_{arg}"),
                    format!("track_{arg}.mp3"),
                    None,
                ));
                nav.add(vec![track], Some(arg));
            }
            1 => {
                let _ = nav.remove(arg);
            }
            2 => {
                let _ = nav.reorder(arg % 4, arg / 4);
            }
            3 => {
                let _ = nav.next();
            }
            4 => {
                let elapsed = Duration::from_secs((arg % 6) as u64);
                let _ = nav.previous(Some(elapsed));
            }
            5 => {
                let _ = nav.jump(arg);
            }
            6 => {
                let _ = nav.set_shuffle(arg % 2 == 0);
            }
            7 => nav.set_loop(match arg % 3 {
                0 => LoopMode::None,
                1 => LoopMode::All,
                _ => LoopMode::One,
            }),
            8 => {
                let _ = nav.start();
            }
            _ => {
                if arg == 0 {
                    nav.clear();
                }
            }
        }
        assert!(nav.store().invariants_hold());
        assert!(nav.history().len() <= 8);
    }
});
