// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use serial_test::serial;

use crate::error::Error;
use crate::runtime::Runtime;

#[test]
fn find_on_path_resolves_standard_tools() {
    let path = find_on_path(Path::new("echo")).unwrap();
    assert!(path.is_absolute());
    assert!(path.ends_with("echo"));
}

#[test]
fn find_on_path_rejects_missing_programs() {
    let result = find_on_path(Path::new("wp2p-no-such-binary"));
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[test]
fn find_on_path_accepts_existing_absolute_paths() {
    let echo = find_on_path(Path::new("echo")).unwrap();
    assert_eq!(find_on_path(&echo).unwrap(), echo);
    assert!(matches!(
        find_on_path(Path::new("/no/such/dir/echo")),
        Err(Error::NotFound(_))
    ));
}

#[test]
#[serial]
fn run_collect_captures_output() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let child = ChildProcess::new(&runtime.handle());
    let (exit_ok, output) = dispatcher
        .block_on(async move {
            child.run_collect(Path::new("echo"), &["hello".to_string()]).await
        })
        .unwrap();
    assert!(exit_ok);
    assert_eq!(output, "hello\n");
}

#[test]
#[serial]
fn stdin_feeds_the_child_and_stdout_comes_back() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let child = ChildProcess::new(&runtime.handle());
    child.execute(Path::new("cat"), &[]).unwrap();
    let stdin = child.stdin().clone();
    let stdout = child.stdout().clone();
    let echoed = dispatcher.block_on(async move {
        stdin.write_line("ping", None).await?;
        let mut line = String::new();
        stdout.read_line(&mut line).await?;
        stdin.co_close().await?;
        Ok::<_, Error>(line)
    });
    assert_eq!(echoed.unwrap(), "ping");
    let reaped = dispatcher.block_on(async move { child.co_wait(None).await });
    assert!(reaped.unwrap());
}

#[test]
#[serial]
fn co_kill_escalates_and_reaps() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let child = ChildProcess::new(&runtime.handle());
    child.execute(Path::new("sleep"), &["30".to_string()]).unwrap();
    child.discard_output(OutputStream::Stdout);
    child.discard_output(OutputStream::Stderr);
    let exited_normally = dispatcher
        .block_on(async move {
            let result = child.co_kill(Duration::from_millis(300)).await?;
            child.wait_outputs().await?;
            Ok::<_, Error>(result)
        })
        .unwrap();
    // Killed by signal, so not a normal exit.
    assert!(!exited_normally);
}

#[test]
#[serial]
fn co_wait_times_out_while_the_child_runs() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let child = ChildProcess::new(&runtime.handle());
    child.execute(Path::new("sleep"), &["30".to_string()]).unwrap();
    let waited = dispatcher.block_on({
        let child = ChildProcess::new(&runtime.handle());
        async move { child.co_wait(Some(Duration::from_millis(50))).await }
    });
    // An unstarted helper reports an immediate, successful exit.
    assert!(waited.unwrap());
    let timed_out = dispatcher
        .block_on(async move { child.co_wait(Some(Duration::from_millis(50))).await });
    assert!(matches!(timed_out, Err(Error::TimedOut)));
}

#[test]
#[serial]
fn explicit_environment_is_passed_through() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let child = ChildProcess::new(&runtime.handle());
    child
        .execute_env(
            Path::new("sh"),
            &["-c".to_string(), "echo $WP2P_PROBE".to_string()],
            &[("WP2P_PROBE".to_string(), "42".to_string())],
        )
        .unwrap();
    let stdout = child.stdout().clone();
    let line = dispatcher.block_on(async move {
        let mut line = String::new();
        stdout.read_line(&mut line).await?;
        child.co_wait(None).await?;
        Ok::<_, Error>(line)
    });
    assert_eq!(line.unwrap(), "42");
}
