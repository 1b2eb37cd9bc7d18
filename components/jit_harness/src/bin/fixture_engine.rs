//! fixture-engine
//!
//! A deterministic stand-in for the runtime under test. It speaks the
//! harness control protocol and runs tiny line-oriented scripts:
//!
//! ```text
//! alloc N [thread]    count N allocations, failing any the plan selects
//! catch               catch errors raised after this line
//! throw Kind: msg     raise an error
//! print text          write a line to stdout
//! sleep MS            sleep
//! crash               abort the process
//! exit N              exit with status N
//! realm ID            switch the current realm
//! call NAME           call a function (traced in observed realms)
//! load NAME           load a script (traced in observed realms)
//! ```

use core_types::{ErrorKind, ThrownError};
use jit_harness::capability::CapabilityReport;
use jit_harness::fault::{AllocationCounter, FaultInjectionPlan, ThreadType};
use jit_harness::protocol::{
    WorkerRecord, CAPABILITIES_FLAG, ENV_GC_ZEAL, ENV_OOM, ENV_REALMS, ENV_SINGLE_THREADED,
    UNCAUGHT_EXCEPTION_STATUS,
};
use jit_harness::realm::{RealmSpec, TraceEvent};
use std::collections::{BTreeMap, BTreeSet};
use std::process;
use std::thread;
use std::time::Duration;

/// Status for problems with the fixture's own inputs
const USAGE_STATUS: i32 = 2;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == CAPABILITIES_FLAG) {
        process::exit(print_capabilities());
    }

    let Some((script, flags)) = args.split_last() else {
        eprintln!("usage: fixture-engine [--flag ...] <script>");
        process::exit(USAGE_STATUS);
    };
    let source = match std::fs::read_to_string(script) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("fixture-engine: cannot read {}: {}", script, e);
            process::exit(USAGE_STATUS);
        }
    };

    let mut engine = match Engine::from_env() {
        Ok(engine) => engine,
        Err(message) => {
            eprintln!("fixture-engine: {}", message);
            process::exit(USAGE_STATUS);
        }
    };
    for flag in flags {
        println!("engine-flag: {}", flag);
    }
    let status = engine.run(&source);
    process::exit(status);
}

fn print_capabilities() -> i32 {
    if let Ok(path) = std::env::var("FIXTURE_CAPABILITIES") {
        return match std::fs::read_to_string(&path) {
            Ok(text) => {
                print!("{}", text);
                0
            }
            Err(e) => {
                eprintln!("fixture-engine: cannot read {}: {}", path, e);
                USAGE_STATUS
            }
        };
    }

    let helper_thread_count = std::env::var("FIXTURE_HELPER_THREADS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2);
    let report = CapabilityReport {
        helper_thread_count,
        features: BTreeSet::from(["wasm".to_string()]),
        build: BTreeMap::from([("debug".to_string(), false.into())]),
        globals: BTreeSet::from(["oomTest".to_string(), "newGlobal".to_string()]),
        single_threaded_replay: std::env::var("FIXTURE_SINGLE_THREADED_REPLAY").as_deref()
            == Ok("1"),
        extra: BTreeMap::new(),
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("fixture-engine: {}", e);
            USAGE_STATUS
        }
    }
}

enum Control {
    Continue,
    Exit(i32),
}

struct Engine {
    counter: AllocationCounter,
    observed: BTreeSet<u32>,
    realm: u32,
    catching: bool,
}

impl Engine {
    fn from_env() -> Result<Self, String> {
        let plan = match std::env::var(ENV_OOM) {
            Ok(value) => Some(
                FaultInjectionPlan::parse_env_value(&value)
                    .map_err(|e| format!("{}: {}", ENV_OOM, e))?,
            ),
            Err(_) => None,
        };
        let realms: Vec<RealmSpec> = match std::env::var(ENV_REALMS) {
            Ok(value) => {
                serde_json::from_str(&value).map_err(|e| format!("{}: {}", ENV_REALMS, e))?
            }
            Err(_) => Vec::new(),
        };
        if std::env::var(ENV_SINGLE_THREADED).as_deref() == Ok("1") {
            println!("single-threaded");
        }
        if let Ok(zeal) = std::env::var(ENV_GC_ZEAL) {
            println!("gc-zeal: {}", zeal);
        }
        for realm in &realms {
            if realm.observed {
                println!("observing realm {}", realm.id);
            }
        }

        Ok(Self {
            counter: AllocationCounter::new(plan),
            observed: realms.iter().filter(|r| r.observed).map(|r| r.id).collect(),
            realm: realms.first().map(|r| r.id).unwrap_or(0),
            catching: false,
        })
    }

    fn run(&mut self, source: &str) -> i32 {
        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            let control = match self.step(line) {
                Ok(()) => Control::Continue,
                Err(error) => self.raise(error),
            };
            if let Control::Exit(status) = control {
                return self.finish(status);
            }
        }
        self.finish(0)
    }

    fn step(&mut self, line: &str) -> Result<(), ThrownError> {
        let (op, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match op {
            "alloc" => {
                let mut parts = rest.split_whitespace();
                let count: u64 = parts
                    .next()
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(|| syntax_error(line))?;
                let thread = match parts.next() {
                    Some(name) => name.parse().map_err(|_| syntax_error(line))?,
                    None => ThreadType::Main,
                };
                for _ in 0..count {
                    if self.counter.allocate(thread) {
                        let index = self.counter.count(thread);
                        emit(&WorkerRecord::OomInjected { thread, index });
                        return Err(ThrownError::new(ErrorKind::InternalError, "out of memory"));
                    }
                }
                Ok(())
            }
            "catch" => {
                self.catching = true;
                Ok(())
            }
            "throw" => Err(ThrownError::parse_line(rest)
                .unwrap_or_else(|| ThrownError::new(ErrorKind::Error, rest))),
            "print" => {
                println!("{}", rest);
                Ok(())
            }
            "sleep" => {
                let ms: u64 = rest.parse().map_err(|_| syntax_error(line))?;
                thread::sleep(Duration::from_millis(ms));
                Ok(())
            }
            "crash" => process::abort(),
            "exit" => {
                let status: i32 = rest.parse().map_err(|_| syntax_error(line))?;
                process::exit(self.finish(status))
            }
            "realm" => {
                self.realm = rest.parse().map_err(|_| syntax_error(line))?;
                Ok(())
            }
            "call" => {
                let function = rest.to_string();
                self.trace(TraceEvent::CallEntry {
                    function: function.clone(),
                });
                self.trace(TraceEvent::CallExit { function });
                Ok(())
            }
            "load" => {
                self.trace(TraceEvent::ScriptLoad {
                    url: rest.to_string(),
                });
                Ok(())
            }
            _ => Err(syntax_error(line)),
        }
    }

    fn raise(&mut self, error: ThrownError) -> Control {
        self.trace(TraceEvent::ExceptionThrown(error.clone()));
        if self.catching {
            println!("caught: {}", error);
            return Control::Continue;
        }
        emit(&WorkerRecord::Thrown(error.clone()));
        eprintln!("uncaught exception: {}", error);
        Control::Exit(UNCAUGHT_EXCEPTION_STATUS)
    }

    fn trace(&self, event: TraceEvent) {
        if self.observed.contains(&self.realm) {
            emit(&WorkerRecord::Trace {
                realm: self.realm,
                event,
            });
        }
    }

    fn finish(&self, status: i32) -> i32 {
        for (thread, count) in self.counter.counts() {
            emit(&WorkerRecord::Allocations {
                thread: *thread,
                count: *count,
            });
        }
        status
    }
}

fn syntax_error(line: &str) -> ThrownError {
    ThrownError::new(
        ErrorKind::SyntaxError,
        format!("cannot interpret `{}`", line),
    )
}

fn emit(record: &WorkerRecord) {
    if let Ok(line) = record.to_line() {
        eprintln!("{}", line);
    }
}
