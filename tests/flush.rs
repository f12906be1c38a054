// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use logcycle::Error;
use logcycle::ErrorKind;
use logcycle::Logger;
use logcycle::LoggerConfig;
use logcycle::Trap;
use rand::Rng;
use rand::distr::Alphanumeric;
use tempfile::TempDir;

#[derive(Debug, Default)]
struct CollectTrap(Mutex<Vec<String>>);

impl Trap for CollectTrap {
    fn trap(&self, err: &Error) {
        self.0.lock().unwrap().push(err.to_string());
    }
}

fn message_only(name: &str, dir: &Path) -> LoggerConfig {
    let mut config = LoggerConfig::new(name);
    config.log_directory = dir.to_path_buf();
    config.console = false;
    config.template = "{message}".to_string();
    config
}

fn random_line(rng: &mut impl Rng) -> String {
    let len = rng.random_range(1..80);
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[test]
fn test_lines_between_flushes_land_in_call_order() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let logger = Logger::new(message_only("app", temp_dir.path())).unwrap();
    let latest = temp_dir.path().join("latest.log");

    let mut rng = rand::rng();
    let mut expected = String::new();
    for _ in 0..5 {
        let count = rng.random_range(0..200);
        let lines = (0..count)
            .map(|_| random_line(&mut rng))
            .collect::<Vec<_>>();
        for line in &lines {
            logger.info(line);
            expected.push_str(line);
            expected.push('\n');
        }

        logger.flush().unwrap();
        assert_eq!(logger.pending(), 0);
        let content = fs::read_to_string(&latest).unwrap_or_default();
        assert_eq!(content, expected);
    }
}

#[test]
fn test_concurrent_producers_lose_nothing() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let mut config = message_only("app", temp_dir.path());
    config.flush_interval = Duration::from_millis(5);
    let logger = Logger::new(config).unwrap();
    logger.init().unwrap();

    let producers = 4;
    let per_producer = 500;
    let handles = (0..producers)
        .map(|p| {
            let logger = logger.clone();
            thread::Builder::new()
                .name(format!("producer-{p}"))
                .spawn(move || {
                    for i in 0..per_producer {
                        logger.info(format_args!("{p}:{i}"));
                    }
                })
                .unwrap()
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap();
    }
    logger.close().unwrap();

    let content = fs::read_to_string(temp_dir.path().join("latest.log")).unwrap();
    let mut next = vec![0; producers];
    let mut total = 0;
    for line in content.lines() {
        let (p, i) = line.split_once(':').unwrap();
        let (p, i) = (p.parse::<usize>().unwrap(), i.parse::<usize>().unwrap());
        assert_eq!(next[p], i, "producer {p} lines out of order");
        next[p] += 1;
        total += 1;
    }
    assert_eq!(total, producers * per_producer);
}

#[test]
fn test_failing_target_does_not_block_others() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let file_a = temp_dir.path().join("a.log");
    let file_b = temp_dir.path().join("b.log");
    // a directory cannot be opened for appending
    fs::create_dir(&file_a).unwrap();

    let mut config = message_only("app", temp_dir.path());
    config.log_to_latest = false;
    config.target_files = vec![file_a.clone(), file_b.clone()];
    config.flush_interval = Duration::from_millis(10);
    let trap = Arc::new(CollectTrap::default());
    let logger = Logger::with_trap(config, trap.clone()).unwrap();
    logger.init().unwrap();

    logger.error("first batch");
    let mut delivered = false;
    for _ in 0..250 {
        thread::sleep(Duration::from_millis(20));
        if fs::read_to_string(&file_b).is_ok_and(|s| s == "first batch\n") {
            delivered = true;
            break;
        }
    }
    assert!(delivered, "file b never received the batch");

    let err = logger.close().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Flush);

    // the background failure went to the trap once, naming the broken file
    let trapped = trap.0.lock().unwrap().clone();
    assert_eq!(trapped.len(), 1, "{trapped:?}");
    assert!(trapped[0].contains("FlushFailure"), "{trapped:?}");
    assert!(trapped[0].contains("a.log"), "{trapped:?}");

    // once the file is writable the kept batch is recovered
    fs::remove_dir(&file_a).unwrap();
    logger.flush().unwrap();
    assert_eq!(fs::read_to_string(&file_a).unwrap(), "first batch\n");
    assert_eq!(fs::read_to_string(&file_b).unwrap(), "first batch\n");
}

#[test]
fn test_logging_while_formatting_a_message() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let logger = Logger::new(message_only("app", temp_dir.path())).unwrap();

    struct Thing<'a> {
        logger: &'a Logger,
        name: &'a str,
    }

    impl std::fmt::Display for Thing<'_> {
        fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            self.logger
                .debug(format_args!("formatting wrapping ({})", self.name));
            f.write_str(self.name)
        }
    }

    logger.info(Thing {
        logger: &logger,
        name: "outer",
    });
    logger.flush().unwrap();

    let content = fs::read_to_string(temp_dir.path().join("latest.log")).unwrap();
    assert_eq!(content, "formatting wrapping (outer)\nouter\n");
}
