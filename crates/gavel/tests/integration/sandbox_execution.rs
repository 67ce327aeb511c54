use std::collections::HashMap;

use gavel::{ExecRequest, ExecutionReport, ResourceBudget, Sandbox, TerminationReason};

/// Run a shell script in a scratch workspace and return the report
async fn run_script(
    script: &str,
    budget: ResourceBudget,
    stdin: Option<&[u8]>,
) -> ExecutionReport {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path();

    std::fs::write(workspace.join("main.sh"), script).unwrap();

    let stdin_path = stdin.map(|bytes| {
        let path = workspace.join("stdin.txt");
        std::fs::write(&path, bytes).unwrap();
        path
    });

    let env = HashMap::new();
    let sandbox = Sandbox::unrestricted();
    sandbox
        .execute(ExecRequest {
            command: vec!["/bin/sh".to_string(), "main.sh".to_string()],
            working_dir: workspace,
            stdin: stdin_path.as_deref(),
            stdout_path: &workspace.join("stdout.txt"),
            stderr_path: &workspace.join("stderr.txt"),
            env: &env,
            path_var: "/usr/bin:/bin",
            budget,
            cancel: None,
        })
        .await
        .expect("sandbox execution failed")
}

fn default_budget() -> ResourceBudget {
    ResourceBudget::new(5, 262144).with_max_processes(8)
}

#[tokio::test]
async fn echo_completes_with_output() {
    let report = run_script("echo hello", default_budget(), None).await;

    assert_eq!(report.termination, TerminationReason::Completed);
    assert_eq!(report.exit_code, Some(0));
    assert!(report.is_success());
    assert_eq!(report.stdout, b"hello\n");
}

#[tokio::test]
async fn stdin_reaches_the_program() {
    let report = run_script("cat", default_budget(), Some(b"line one\nline two\n")).await;

    assert!(report.is_success());
    assert_eq!(report.stdout, b"line one\nline two\n");
}

#[tokio::test]
async fn nonzero_exit_is_completed_not_signaled() {
    let report = run_script("exit 3", default_budget(), None).await;

    assert_eq!(report.termination, TerminationReason::Completed);
    assert_eq!(report.exit_code, Some(3));
    assert!(!report.is_success());
}

#[tokio::test]
async fn sleeping_past_the_wall_deadline_times_out() {
    let budget = ResourceBudget::new(1, 262144).with_max_processes(8);
    let report = run_script("sleep 30", budget, None).await;

    assert_eq!(report.termination, TerminationReason::TimedOut);
    // The watchdog must fire at the deadline, not when sleep finishes:
    // bounded scheduling slack of well under a second
    assert!(
        report.wall_time_ms < 2000,
        "killed after {} ms",
        report.wall_time_ms
    );
}

#[tokio::test]
async fn busy_loop_times_out() {
    let budget = ResourceBudget::new(1, 262144).with_max_processes(8);
    let report = run_script("while :; do :; done", budget, None).await;

    assert_eq!(report.termination, TerminationReason::TimedOut);
    assert!(report.wall_time_ms < 2000);
}

#[tokio::test]
async fn runaway_output_is_cut_at_the_ceiling() {
    let budget = ResourceBudget::new(5, 262144)
        .with_output_bytes(4096)
        .with_max_processes(8);
    let report = run_script(
        "while :; do echo aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa; done",
        budget,
        None,
    )
    .await;

    assert_eq!(report.termination, TerminationReason::OutputExceeded);
    assert!(report.stdout.len() as u64 <= 4096);
}

#[tokio::test]
async fn fatal_signal_is_reported() {
    let report = run_script("kill -s SEGV $$", default_budget(), None).await;

    match report.termination {
        TerminationReason::Signaled(signal) => assert_eq!(signal, libc::SIGSEGV),
        other => panic!("expected a signal death, got {other:?}"),
    }
}

#[tokio::test]
async fn background_children_die_with_the_sandbox() {
    // The script backgrounds a long sleep and prints its pid; once execute
    // returns, that process must not be running anymore
    let report = run_script("sleep 300 & echo $!", default_budget(), None).await;

    assert!(report.is_success());
    let pid: i32 = String::from_utf8_lossy(&report.stdout)
        .trim()
        .parse()
        .expect("script prints the background pid");

    assert!(
        !process_is_running(pid),
        "background child {pid} survived sandbox teardown"
    );
}

#[tokio::test]
async fn allocation_beyond_the_memory_ceiling_cannot_succeed() {
    let budget = ResourceBudget::new(5, 32 * 1024).with_max_processes(8);
    let report = run_script(
        "dd if=/dev/zero of=/dev/null bs=64M count=1",
        budget,
        None,
    )
    .await;

    assert!(
        !report.is_success(),
        "a 64 MB buffer under a 32 MB ceiling must not succeed: {:?}",
        report.termination
    );
}

#[tokio::test]
async fn launch_failure_is_a_report_not_a_panic() {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path();
    let env = HashMap::new();

    let sandbox = Sandbox::unrestricted();
    let report = sandbox
        .execute(ExecRequest {
            command: vec!["/no/such/binary".to_string()],
            working_dir: workspace,
            stdin: None,
            stdout_path: &workspace.join("stdout.txt"),
            stderr_path: &workspace.join("stderr.txt"),
            env: &env,
            path_var: "/usr/bin:/bin",
            budget: default_budget(),
            cancel: None,
        })
        .await
        .unwrap();

    assert_eq!(report.termination, TerminationReason::LaunchFailed);
}

#[tokio::test]
#[ignore = "requires root"]
async fn run_user_identity_is_dropped() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let mut config = super::test_config(dir.path());
    config.run_user = Some("nobody".to_string());

    let sandbox = Sandbox::from_config(&config).expect("nobody must resolve when root");

    let workspace = dir.path().join("ws");
    std::fs::create_dir_all(&workspace).unwrap();
    // tempdirs are 0700; the restricted user must be able to traverse in
    for path in [dir.path(), workspace.as_path()] {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    std::fs::write(workspace.join("main.sh"), "id -u").unwrap();

    let env = HashMap::new();
    let report = sandbox
        .execute(ExecRequest {
            command: vec!["/bin/sh".to_string(), "main.sh".to_string()],
            working_dir: &workspace,
            stdin: None,
            stdout_path: &workspace.join("stdout.txt"),
            stderr_path: &workspace.join("stderr.txt"),
            env: &env,
            path_var: "/usr/bin:/bin",
            budget: default_budget(),
            cancel: None,
        })
        .await
        .unwrap();

    let expected = nix::unistd::User::from_name("nobody")
        .unwrap()
        .unwrap()
        .uid
        .as_raw();
    let reported = String::from_utf8_lossy(&report.stdout).trim().to_string();
    assert_eq!(reported, expected.to_string());
}

/// A process still counts as gone if only its zombie entry remains
fn process_is_running(pid: i32) -> bool {
    let stat = match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat,
        Err(_) => return false,
    };
    // State is the field after the parenthesized comm
    match stat.rsplit(") ").next().and_then(|rest| rest.chars().next()) {
        Some('Z') => false,
        Some(_) => true,
        None => false,
    }
}
