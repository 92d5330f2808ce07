use anyhow::Context;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tune_queue::config;
use tune_queue::persistence::{JsonFileStore, MemoryStore, SnapshotStore};
use tune_queue::transport::NullTransport;
use tune_queue::{LoopMode, QueueEvent, QueueHandle, QueueService, QueueSnapshot, TrackRef};

#[derive(Debug, Default)]
struct CliArgs {
    config_dir: Option<PathBuf>,
    seed: Option<u64>,
    memory: bool,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;
    init_logging();

    if let Some(dir) = &args.config_dir {
        // Set before any thread is spawned.
        unsafe {
            std::env::set_var("TUNEQUEUE_CONFIG_DIR", dir);
        }
    }

    let mut engine_config = config::load_config()?;
    if args.seed.is_some() {
        engine_config.shuffle_seed = args.seed;
    }
    let store: Box<dyn SnapshotStore> = if args.memory {
        Box::new(MemoryStore::new())
    } else {
        config::ensure_config_dir()?;
        Box::new(JsonFileStore::in_config_dir()?)
    };

    let service = QueueService::spawn(&engine_config, store, Box::new(NullTransport::new()))?;
    let handle = service.handle();
    let events = handle.subscribe();
    run_repl(&handle, &events)?;
    service.shutdown();
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--config-dir" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--config-dir requires a directory");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--config-dir cannot be empty");
                }
                out.config_dir = Some(PathBuf::from(value.trim()));
            }
            "--seed" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--seed requires a number");
                };
                let seed = value
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid seed {value}"))?;
                out.seed = Some(seed);
            }
            "--memory" => out.memory = true,
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument {other}"),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("tune-queue");
    println!("  --config-dir DIR  Read engine.json and keep queue.json in DIR");
    println!("  --seed N          Seed the shuffle for reproducible orders");
    println!("  --memory          Do not persist the queue");
    println!();
    print_commands();
}

fn print_commands() {
    println!("commands:");
    println!("  add PATH... [@POS]   queue files, optionally at POS");
    println!("  remove I | move FROM TO | clear");
    println!("  shuffle on|off | loop none|all|one");
    println!("  next | prev | jump I | play");
    println!("  pause | resume | seek SECONDS");
    println!("  show | help | quit");
}

fn run_repl(handle: &QueueHandle, events: &Receiver<QueueEvent>) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    print!("> ");
    stdout.flush()?;

    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["quit" | "exit"] => break,
            ["help"] => print_commands(),
            words => {
                if let Err(err) = run_command(handle, words) {
                    println!("error: {err:#}");
                }
            }
        }
        for event in events.try_iter() {
            print_event(&event);
        }
        print!("> ");
        stdout.flush()?;
    }
    Ok(())
}

fn run_command(handle: &QueueHandle, words: &[&str]) -> anyhow::Result<()> {
    match words {
        ["add", rest @ ..] if !rest.is_empty() => {
            let (paths, position) = match rest.split_last() {
                Some((last, paths)) if last.starts_with('@') => {
                    let position = last
                        .trim_start_matches('@')
                        .parse()
                        .with_context(|| format!("invalid position {last}"))?;
                    (paths, Some(position))
                }
                _ => (rest, None),
            };
            let tracks = paths
                .iter()
                .map(|path| TrackRef::from_path(Path::new(path)).into())
                .collect();
            let ids = handle.add(tracks, position)?;
            println!("queued {} item(s)", ids.len());
        }
        ["remove", index] => {
            let removed = handle.remove(parse_index(index)?)?;
            println!("removed {}", removed.track.title());
        }
        ["move", from, to] => handle.reorder(parse_index(from)?, parse_index(to)?)?,
        ["clear"] => handle.clear()?,
        ["shuffle", toggle] => {
            let enabled = match *toggle {
                "on" => true,
                "off" => false,
                other => anyhow::bail!("expected on or off, got {other}"),
            };
            handle.set_shuffle(enabled)?;
        }
        ["loop", mode] => {
            let mode = LoopMode::parse(mode)
                .with_context(|| format!("unknown loop mode {mode}"))?;
            handle.set_loop(mode)?;
        }
        ["next"] => {
            handle.next()?;
        }
        ["prev"] => {
            handle.previous()?;
        }
        ["jump", index] => {
            handle.jump(parse_index(index)?)?;
        }
        ["play"] => {
            handle.start()?;
        }
        ["pause"] => print_position(handle.pause()?),
        ["resume"] => print_position(handle.resume()?),
        ["seek", seconds] => {
            let seconds: f64 = seconds
                .parse()
                .with_context(|| format!("invalid seconds {seconds}"))?;
            let position = Duration::try_from_secs_f64(seconds)
                .with_context(|| format!("invalid seconds {seconds}"))?;
            print_position(handle.seek(position)?);
        }
        ["show"] => print_snapshot(&handle.snapshot()?),
        other => anyhow::bail!("unknown command {}", other.join(" ")),
    }
    Ok(())
}

fn parse_index(raw: &str) -> anyhow::Result<usize> {
    raw.parse()
        .with_context(|| format!("invalid index {raw}"))
}

fn print_position(position: Option<Duration>) {
    match position {
        Some(position) => println!("at {:.1}s", position.as_secs_f64()),
        None => println!("nothing playing"),
    }
}

fn print_snapshot(snapshot: &QueueSnapshot) {
    println!(
        "revision {}  shuffle {}  loop {}",
        snapshot.revision,
        if snapshot.shuffle { "on" } else { "off" },
        snapshot.loop_mode.label()
    );
    if snapshot.items.is_empty() {
        println!("  (empty)");
    }
    for (index, item) in snapshot.items.iter().enumerate() {
        let marker = if snapshot.current_index == Some(index) {
            '>'
        } else {
            ' '
        };
        println!("{marker} {index:>3} {} {}", item.id, item.track.title());
    }
}

fn print_event(event: &QueueEvent) {
    match event {
        QueueEvent::QueueChanged(snapshot) => {
            println!("~ queue changed (revision {})", snapshot.revision)
        }
        QueueEvent::TrackAdvanced(track) => println!("~ now playing {}", track.title()),
        QueueEvent::ShuffleChanged(enabled) => println!("~ shuffle {}", if *enabled { "on" } else { "off" }),
        QueueEvent::PersistenceFailed { attempts, error } => {
            println!("~ could not save queue after {attempts} attempt(s): {error}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_args;

    #[test]
    fn parses_flags() {
        let args = parse_args(vec![
            String::from("--memory"),
            String::from("--seed"),
            String::from("42"),
            String::from("--config-dir"),
            String::from("/tmp/q"),
        ])
        .expect("args");
        assert!(args.memory);
        assert_eq!(args.seed, Some(42));
        assert_eq!(args.config_dir.as_deref(), Some(std::path::Path::new("/tmp/q")));
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(parse_args(vec![String::from("--host")]).is_err());
    }
}
