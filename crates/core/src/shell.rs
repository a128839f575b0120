use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{AgentError, AgentResult};
use crate::logger;

pub const NO_OUTPUT: &str = "(no output)";

const RECV_TICK: Duration = Duration::from_millis(100);
const EXIT_DRAIN: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy)]
pub struct ShellOptions {
    pub timeout: Duration,
    pub flush_interval: Duration,
}

fn platform_shell(cmd: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", cmd]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", cmd]);
        c
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: R, tx: mpsc::Sender<String>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Run `cmd` through the platform shell, merging stdout and stderr.
///
/// `on_partial` receives the accumulated output at most once per
/// `flush_interval` while the command runs. The command is killed after
/// `timeout`.
pub fn run_shell(cmd: &str, opts: ShellOptions, on_partial: &mut dyn FnMut(&str)) -> AgentResult<String> {
    logger::info_p("shell", &format!("$ {}", cmd));
    let mut child = platform_shell(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let (tx, rx) = mpsc::channel::<String>();
    let mut readers = Vec::new();
    if let Some(out) = child.stdout.take() {
        readers.push(spawn_reader(out, tx.clone()));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(spawn_reader(err, tx.clone()));
    }
    drop(tx);

    let child: Arc<Mutex<Child>> = Arc::new(Mutex::new(child));
    let timed_out = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let watchdog = {
        let child = Arc::clone(&child);
        let timed_out = Arc::clone(&timed_out);
        let timeout = opts.timeout;
        thread::spawn(move || {
            if let Err(mpsc::RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                let mut c = lock_child(&child);
                if let Ok(None) = c.try_wait() {
                    timed_out.store(true, Ordering::SeqCst);
                    let _ = c.kill();
                }
            }
        })
    };

    let mut output = String::new();
    let mut last_flush = Instant::now();
    let mut flushed_len = 0;
    let mut exited_at: Option<Instant> = None;
    let mut done_tx = Some(done_tx);
    let status = loop {
        match rx.recv_timeout(RECV_TICK) {
            Ok(line) => output.push_str(&line),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                break wait_child(&child)?;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        if output.len() != flushed_len && last_flush.elapsed() >= opts.flush_interval {
            on_partial(&output);
            flushed_len = output.len();
            last_flush = Instant::now();
        }

        // A grandchild may hold the pipes open after the shell exits.
        let exited = lock_child(&child).try_wait()?;
        if let Some(status) = exited {
            if let Some(tx) = done_tx.take() {
                let _ = tx.send(());
            }
            let since = *exited_at.get_or_insert_with(Instant::now);
            if since.elapsed() >= EXIT_DRAIN {
                while let Ok(line) = rx.try_recv() {
                    output.push_str(&line);
                }
                break status;
            }
        }
    };

    if let Some(tx) = done_tx.take() {
        let _ = tx.send(());
    }
    let _ = watchdog.join();
    if exited_at.is_none() {
        for r in readers {
            let _ = r.join();
        }
    }

    let text = output.trim_end().to_string();
    let text = if text.trim().is_empty() { NO_OUTPUT.to_string() } else { text };

    if timed_out.load(Ordering::SeqCst) {
        logger::warn_p("shell", &format!("timed out after {:?}", opts.timeout));
        return Err(AgentError::CommandTimedOut { secs: opts.timeout.as_secs(), output: text });
    }
    if !status.success() {
        let code = status.code().unwrap_or(-1);
        logger::warn_p("shell", &format!("exit code {}", code));
        return Err(AgentError::CommandFailed { code, output: text });
    }
    Ok(text)
}

fn lock_child(child: &Arc<Mutex<Child>>) -> std::sync::MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|p| p.into_inner())
}

fn wait_child(child: &Arc<Mutex<Child>>) -> AgentResult<std::process::ExitStatus> {
    loop {
        if let Some(status) = lock_child(child).try_wait()? {
            return Ok(status);
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(target_os = "windows")]
const ALLOWED_APPS: &[(&str, &str)] = &[
    ("chrome", "start chrome"),
    ("vscode", "start code"),
    ("notepad", "start notepad"),
    ("explorer", "start explorer"),
    ("terminal", "start wt"),
    ("powershell", "start powershell"),
];

/// Launch an application without waiting for it.
#[cfg(target_os = "windows")]
pub fn open_app(app: &str) -> AgentResult<String> {
    let name = app.trim().to_lowercase();
    let launch = ALLOWED_APPS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, l)| *l)
        .ok_or_else(|| {
            let allowed: Vec<&str> = ALLOWED_APPS.iter().map(|(n, _)| *n).collect();
            AgentError::Unsupported(format!("Unsupported app '{}'. Allowed: {}", app.trim(), allowed.join(", ")))
        })?;
    platform_shell(launch)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    logger::info_p("shell", &format!("launched {}", name));
    Ok(format!("Opened {}", name))
}

/// Launch an application without waiting for it.
#[cfg(not(target_os = "windows"))]
pub fn open_app(app: &str) -> AgentResult<String> {
    let argv = shell_words::split(app)
        .map_err(|e| AgentError::usage(format!("Cannot parse app command {:?}: {}", app, e)))?;
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AgentError::usage("Usage: /open [app_name]"))?;
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    logger::info_p("shell", &format!("launched {}", program));
    Ok(format!("Opened {}", app.trim()))
}
