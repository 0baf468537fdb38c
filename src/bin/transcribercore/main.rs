//! Server entry point (spec.md §6.1/§9). Boots the connection pool, runs the
//! schema-version guard, resets orphaned local jobs, then starts the HTTP
//! server alongside every background driver (worker pools, feed discovery,
//! retry scheduler, node heartbeat sweep, storage sweep) each on its own
//! thread with a shared `StopSignal`. Mirrors the teacher's `bin/podcore`
//! clap-subcommand layout, narrowed to the subset this system needs.

#[macro_use]
extern crate slog;

use transcribercore::config::Config;
use transcribercore::db;
use transcribercore::errors::{Error, Result};
use transcribercore::http_requester::{HttpRequesterFactory, HttpRequesterFactoryLive};
use transcribercore::mediators::download_worker::{self, LiveAudioFetcher};
use transcribercore::mediators::embed_worker::{self, LiveEmbedder};
use transcribercore::mediators::feed_discovery::FeedDiscovery;
use transcribercore::mediators::transcribe_worker::{self, AsrSource, LiveAsrBackend};
use transcribercore::mediators::transcript_download_worker;
use transcribercore::mediators::{PauseGate, StopSignal};
use transcribercore::model::Feed;
use transcribercore::node_coordinator::NodeCoordinator;
use transcribercore::provisioner::{PodProvider, Provisioner, RunPodProvider};
use transcribercore::queue::Queue;
use transcribercore::schema::feed;
use transcribercore::web;
use transcribercore::web::state::AppState;

use clap::{Parser, Subcommand};
use diesel::prelude::*;
use slog::Logger;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "transcribercore", version, about = "Podcast transcript job orchestrator")]
struct Cli {
    #[arg(long, global = true, help = "Quiet all log output")]
    quiet: bool,
    #[arg(long, global = true, help = "Log asynchronously (good for servers)")]
    log_async: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the HTTP API and every background driver.
    Serve,
    /// Fetches a feed, adds it, and runs a first discovery pass.
    AddFeed { url: String },
    /// Runs one (or, with --loop, repeated) feed discovery pass.
    Crawl {
        #[arg(long)]
        run_once: bool,
    },
    /// Sweeps `awaiting_transcript` episodes due for retry. Runs forever.
    Retry,
    /// Sleeps for the given number of seconds (useful for container probes).
    Sleep { seconds: u64 },
}

fn main() {
    let cli = Cli::parse();
    let log = transcribercore::logging::build(cli.quiet, cli.log_async);

    let res = match cli.command {
        Commands::Serve => serve(&log),
        Commands::AddFeed { url } => add_feed(&log, &url),
        Commands::Crawl { run_once } => crawl(&log, run_once),
        Commands::Retry => retry(&log),
        Commands::Sleep { seconds } => {
            info!(log, "Starting sleep"; "seconds" => seconds);
            thread::sleep(Duration::from_secs(seconds));
            info!(log, "Finished sleep");
            Ok(())
        }
    };

    if let Err(ref e) = res {
        transcribercore::logging::print_error(&log, e);
        std::process::exit(1);
    }
}

fn boot_pool(log: &Logger, config: &Config) -> Result<db::Pool> {
    let pool = db::build_pool(&config.database_url, config.pool_min_size, config.pool_max_size)?;
    let mut conn = pool.get().map_err(Error::Pool)?;
    db::check_schema_version(&mut conn)?;
    let reset = db::reset_local_jobs_on_boot(&mut conn)?;
    if reset > 0 {
        info!(log, "Reset orphaned local jobs on boot"; "count" => reset);
    }
    Ok(pool)
}

fn http_requester_factory(config: &Config) -> HttpRequesterFactoryLive {
    HttpRequesterFactoryLive {
        timeout: Duration::from_secs(config.http_timeout_seconds),
    }
}

fn pod_provider(config: &Config) -> Box<dyn PodProvider> {
    Box::new(RunPodProvider::new(
        config.runpod_api_key.clone().unwrap_or_default(),
        Duration::from_secs(config.http_timeout_seconds),
    ))
}

/// Starts the web server plus every background driver, each on its own
/// thread sharing one `StopSignal` so ctrl-c (or a future supervisor signal)
/// can stop them all without leaking a thread (spec.md §9 "Background
/// loops... observe that signal at every I/O checkpoint").
fn serve(log: &Logger) -> Result<()> {
    let config = Arc::new(Config::from_env()?);
    let pool = boot_pool(log, &config)?;
    let queue = Arc::new(Queue::new());
    let coordinator = Arc::new(NodeCoordinator::new(
        pool.clone(),
        Arc::clone(&queue),
        config.node_heartbeat_timeout_seconds,
        config.asr_model.clone(),
    ));
    let provisioner = Arc::new(Provisioner::new(pod_provider(&config)));
    let discovery_pause = PauseGate::new();
    let stop = StopSignal::new();

    let mut threads = vec![];

    // Transcript download pool (first of the local stages; pausable while
    // feed discovery is mid-pass, spec.md §4.7).
    {
        let mediator = transcript_download_worker::Mediator {
            pool: pool.clone(),
            queue: Arc::clone(&queue),
            http_requester_factory: Box::new(http_requester_factory(&config)),
            num_workers: config.max_transcript_download_workers as u32,
            storage_path: config.storage_path.clone(),
            transcript_retry_days: config.transcript_retry_days,
            pause: discovery_pause.clone(),
            stop: stop.clone(),
        };
        let log = log.new(o!("component" => "transcript_download"));
        threads.push(thread::spawn(move || mediator.run(&log)));
    }

    // Download pool (premium-feed audio fetch).
    {
        let client_timeout = Duration::from_secs(config.http_timeout_seconds);
        let mediator = download_worker::Mediator {
            pool: pool.clone(),
            queue: Arc::clone(&queue),
            fetcher_factory: move || -> Box<dyn download_worker::AudioFetcher> {
                Box::new(LiveAudioFetcher::new(client_timeout))
            },
            num_workers: config.max_concurrent_downloads as u32,
            storage_path: config.storage_path.clone(),
            temp_download_path: config.temp_download_path.clone(),
            stop: stop.clone(),
        };
        let log = log.new(o!("component" => "download"));
        threads.push(thread::spawn(move || mediator.run(&log)));
    }

    // Transcribe pool -- one local slot per spec.md §4.4.
    {
        let asr_command = config.asr_command.clone();
        let asr_source = match config.asr_source.as_str() {
            "parakeet" => AsrSource::Parakeet,
            _ => AsrSource::Whisper,
        };
        let asr_model = config.asr_model.clone();
        let mediator = transcribe_worker::Mediator {
            pool: pool.clone(),
            queue: Arc::clone(&queue),
            backend_factory: move || -> Box<dyn transcribe_worker::AsrBackend> {
                Box::new(LiveAsrBackend {
                    command: asr_command.clone(),
                    source: asr_source,
                    model: asr_model.clone(),
                })
            },
            num_workers: 1,
            storage_path: config.storage_path.clone(),
            whisper_chunk_threshold_minutes: config.whisper_chunk_threshold_minutes,
            stop: stop.clone(),
        };
        let log = log.new(o!("component" => "transcribe"));
        threads.push(thread::spawn(move || mediator.run(&log)));
    }

    // Embed pool -- one slot per spec.md §9.
    {
        let embedding_command = config.embedding_command.clone();
        let embedding_model = config.embedding_model.clone();
        let dimensions = config.embedding_dimensions;
        let mediator = embed_worker::Mediator {
            pool: pool.clone(),
            queue: Arc::clone(&queue),
            embedder_factory: move || -> Box<dyn embed_worker::Embedder> {
                Box::new(LiveEmbedder {
                    command: embedding_command.clone(),
                    model: embedding_model.clone(),
                    dimensions,
                })
            },
            stop: stop.clone(),
        };
        let log = log.new(o!("component" => "embed"));
        threads.push(thread::spawn(move || mediator.run(&log)));
    }

    // Feed discovery driver (C7), every `refresh_interval`.
    {
        let pool = pool.clone();
        let queue = Arc::clone(&queue);
        let factory: Box<dyn HttpRequesterFactory> = Box::new(http_requester_factory(&config));
        let pause = discovery_pause.clone();
        let stop = stop.clone();
        let log = log.new(o!("component" => "feed_discovery"));
        threads.push(thread::spawn(move || {
            let discovery = FeedDiscovery {
                pool,
                queue,
                http_requester_factory: factory,
                num_workers: 4,
                refresh_interval: chrono::Duration::hours(1),
                transcript_download_pause: pause,
            };
            while !stop.is_stopped() {
                match discovery.run(&log) {
                    Ok(res) => info!(log, "Discovery pass finished"; "num_feeds" => res.num_feeds, "num_new_episodes" => res.num_new_episodes),
                    Err(e) => error!(log, "Discovery pass failed"; "error" => e.to_string()),
                }
                stop.sleep(Duration::from_secs(3600));
            }
        }));
    }

    // Retry scheduler (C8).
    {
        let scheduler = transcribercore::retry_scheduler::RetryScheduler::new(
            pool.clone(),
            Arc::clone(&queue),
            log.new(o!("component" => "retry_scheduler")),
            config.transcript_retry_days,
            stop.clone(),
        );
        threads.push(thread::spawn(move || scheduler.run()));
    }

    // Reclaim pass (spec.md §4.2 "Reclamation"), every 30s.
    {
        let pool = pool.clone();
        let queue = Arc::clone(&queue);
        let reclaim_timeout = chrono::Duration::minutes(config.remote_job_timeout_minutes);
        let stop = stop.clone();
        let log = log.new(o!("component" => "reclaim"));
        threads.push(thread::spawn(move || {
            while !stop.is_stopped() {
                if let Ok(mut conn) = pool.get() {
                    match queue.reclaim_once(&mut conn, reclaim_timeout) {
                        Ok(n) if n > 0 => info!(log, "Reclaimed stuck jobs"; "count" => n),
                        Ok(_) => {}
                        Err(e) => error!(log, "Reclaim pass failed"; "error" => e.to_string()),
                    }
                }
                stop.sleep(Duration::from_secs(30));
            }
        }));
    }

    // Node heartbeat sweep + flush (spec.md §4.5).
    {
        let pool = pool.clone();
        let coordinator = Arc::clone(&coordinator);
        let stop = stop.clone();
        let log = log.new(o!("component" => "node_sweep"));
        threads.push(thread::spawn(move || {
            let mut ticks = 0u64;
            while !stop.is_stopped() {
                if let Ok(mut conn) = pool.get() {
                    if let Err(e) = coordinator.sweep_stale(&mut conn) {
                        error!(log, "Node sweep failed"; "error" => e.to_string());
                    }
                    // Flush batches every 5 minutes (10 ticks at 30s).
                    if ticks % 10 == 0 {
                        if let Err(e) = coordinator.flush_heartbeats(&mut conn) {
                            error!(log, "Heartbeat flush failed"; "error" => e.to_string());
                        }
                    }
                }
                ticks += 1;
                stop.sleep(Duration::from_secs(30));
            }
        }));
    }

    // Storage sweep (orphaned trash/temp cleanup, spec.md §4.9).
    {
        let storage_path = config.storage_path.clone();
        let temp_download_path = config.temp_download_path.clone();
        let stop = stop.clone();
        let log = log.new(o!("component" => "storage_sweep"));
        threads.push(thread::spawn(move || {
            while !stop.is_stopped() {
                if let Err(e) = transcribercore::storage::sweep(&storage_path, &temp_download_path) {
                    error!(log, "Storage sweep failed"; "error" => e.to_string());
                }
                stop.sleep(Duration::from_secs(3600));
            }
        }));
    }

    let state = actix_web::web::Data::new(AppState {
        pool,
        queue,
        coordinator,
        provisioner,
        config: Arc::clone(&config),
        log: log.clone(),
        discovery_pause,
        http_requester_factory: Box::new(http_requester_factory(&config)),
    });

    let sys = actix_rt::System::new();
    let res = sys.block_on(web::run(log.clone(), state));
    stop.stop();
    for t in threads {
        let _ = t.join();
    }
    res.map_err(Error::Io)
}

/// One-shot feed add, outside the HTTP API (spec.md §6.1 "Add feed" is also
/// reachable this way for operators scripting bulk imports).
fn add_feed(log: &Logger, url: &str) -> Result<()> {
    let config = Config::from_env()?;
    let pool = boot_pool(log, &config)?;
    let queue = Arc::new(Queue::new());
    let factory = http_requester_factory(&config);
    let mut requester = factory.create();

    let doc = transcribercore::feed_parser::fetch_and_parse(log, &mut *requester, url)?;
    let mut conn = pool.get().map_err(Error::Pool)?;
    let slug = transcribercore::storage::sanitize_title(&doc.title).to_lowercase();

    let ins = transcribercore::model::insertable::Feed {
        url: url.to_owned(),
        slug,
        title: doc.title.clone(),
        title_override: None,
        author: None,
        site_link_url: None,
        category_tags: Vec::new(),
        itunes_id: None,
        pocketcasts_show_uuid: None,
        paused: false,
    };
    let fd: Feed = diesel::insert_into(feed::table).values(&ins).get_result(&mut conn)?;
    info!(log, "Added feed"; "id" => fd.id, "title" => &fd.title);

    let num_new = transcribercore::mediators::feed_discovery::refresh_feed_by_id(log, &pool, &queue, &factory, fd.id)?;
    info!(log, "Ran first discovery pass"; "num_new_episodes" => num_new);
    Ok(())
}

fn crawl(log: &Logger, run_once: bool) -> Result<()> {
    let config = Config::from_env()?;
    let pool = boot_pool(log, &config)?;
    let queue = Arc::new(Queue::new());
    let factory: Box<dyn HttpRequesterFactory> = Box::new(http_requester_factory(&config));
    let pause = PauseGate::new();

    let discovery = FeedDiscovery {
        pool,
        queue,
        http_requester_factory: factory,
        num_workers: 4,
        refresh_interval: chrono::Duration::hours(1),
        transcript_download_pause: pause,
    };

    loop {
        let res = discovery.run(log)?;
        info!(log, "Discovery pass finished"; "num_feeds" => res.num_feeds, "num_new_episodes" => res.num_new_episodes);
        if run_once {
            return Ok(());
        }
        if res.num_new_episodes < 1 {
            thread::sleep(Duration::from_secs(60));
        }
    }
}

fn retry(log: &Logger) -> Result<()> {
    let config = Config::from_env()?;
    let pool = boot_pool(log, &config)?;
    let queue = Arc::new(Queue::new());
    let scheduler = transcribercore::retry_scheduler::RetryScheduler::new(
        pool,
        queue,
        log.clone(),
        config.transcript_retry_days,
        StopSignal::new(),
    );
    scheduler.run();
    Ok(())
}
