#[cfg(test)]
mod tests {
    use checkrt_core::Tally;
    use checkrt_exec::{
        ANY_OUTPUT, ProcSpec, Runner, check_command, check_exec, check_exec_env,
    };

    fn spec(stdin: &str, stdout: &str, stderr: &str, status: i32) -> ProcSpec {
        ProcSpec::builder()
            .status(status)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr)
            .build()
    }

    #[track_caller]
    fn assert_command_passes(command: &str, spec: &ProcSpec) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut tally = Tally::new();
        check_command(&mut tally, command, spec);
        assert_eq!((tally.passed, tally.failed, tally.errored), (1, 0, 0), "{tally:?}");
    }

    #[test]
    fn test_true_cmd() {
        assert_command_passes("true", &ProcSpec::blank());
    }

    #[test]
    fn test_false_cmd() {
        assert_command_passes("false", &spec("", "", "", 1));
    }

    #[test]
    fn test_exit_5_cmd() {
        assert_command_passes("exit 5", &spec("", "", "", 5));
    }

    #[test]
    fn test_exit_252_cmd_is_a_normal_exit() {
        assert_command_passes("exit 252", &ProcSpec::status(252));
    }

    #[test]
    fn test_exit_252_cmd_against_zero_fails() {
        let mut tally = Tally::quiet();
        check_command(&mut tally, "exit 252", &ProcSpec::status(0));
        assert_eq!((tally.passed, tally.failed, tally.errored), (0, 1, 0));
        assert!(tally.mentions("have: 252  (from: actual exit code)"));
    }

    #[test]
    fn test_echo_out_cmd() {
        assert_command_passes("echo hello world", &spec("", "hello world\n", "", 0));
    }

    #[test]
    fn test_echo_err_cmd() {
        assert_command_passes("echo hello world >&2", &spec("", "", "hello world\n", 0));
    }

    #[test]
    fn test_echo_both_cmd() {
        assert_command_passes(
            "echo hello world; echo goodbye world >&2",
            &spec("", "hello world\n", "goodbye world\n", 0),
        );
    }

    #[test]
    fn test_false_against_zero_fails_with_status() {
        let mut tally = Tally::quiet();
        check_command(&mut tally, "false", &ProcSpec::status(0));
        assert_eq!((tally.passed, tally.failed), (0, 1));
        assert!(tally.mentions("have: 1  (from: actual exit code)"));
        assert!(tally.mentions("want: 0  (from: expected exit code)"));
    }

    #[test]
    fn test_wrong_output_fails_once() {
        let mut tally = Tally::quiet();
        check_command(
            &mut tally,
            "echo nope; exit 3",
            &spec("", "yes\n", "", 0),
        );
        assert_eq!((tally.passed, tally.failed, tally.errored), (0, 1, 0));
        assert!(tally.mentions("additional failure:"));
        assert!(tally.mentions(r#"have: "nope\n"  (from: actual stdout)"#));
    }

    #[test]
    fn test_grep_exec() {
        let mut tally = Tally::new();
        check_exec(
            &mut tally,
            &["grep", "-E", " "],
            &spec("spaceless\nspace full\n   \nnope\n", "space full\n   \n", "", 0),
        );
        assert_eq!(tally.passed, 1, "{tally:?}");
    }

    #[test]
    fn test_cat_exec() {
        let mut tally = Tally::new();
        check_exec(
            &mut tally,
            &["cat", "meow"],
            &ProcSpec::builder()
                .status(1)
                .stdin("blah blah blah\n")
                .stdout("")
                .stderr(ANY_OUTPUT)
                .build(),
        );
        assert_eq!(tally.passed, 1, "{tally:?}");
    }

    #[test]
    fn test_exec_env_entry_reaches_child() {
        let mut tally = Tally::new();
        check_exec_env(
            &mut tally,
            &["sh", "-c", "echo \"$CHECKRT_WHO\""],
            "CHECKRT_WHO=student",
            &spec("", "student\n", "", 0),
        );
        assert_eq!(tally.passed, 1, "{tally:?}");
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let mut tally = Tally::quiet();
        check_exec(
            &mut tally,
            &["checkrt-definitely-not-installed"],
            &ProcSpec::blank(),
        );
        assert_eq!((tally.passed, tally.failed, tally.errored), (0, 0, 1));
        assert!(tally.mentions("could not execute"));
        assert!(tally.mentions("No such file or directory"));
    }

    #[test]
    fn test_missing_launcher_is_an_error() {
        let runner = Runner::builder().launcher("/nonexistent/env").build();
        let mut tally = Tally::quiet();
        runner.check(&mut tally, "check_exec", &["true"], None, &ProcSpec::blank());
        assert_eq!(tally.errored, 1);
        assert!(tally.mentions("/nonexistent/env: could not execute"));
    }

    #[test]
    fn test_killed_child_fails_and_still_compares_output() {
        let mut tally = Tally::quiet();
        check_command(&mut tally, "echo before; kill -9 $$", &spec("", "after\n", "", 0));
        assert_eq!((tally.passed, tally.failed), (0, 1));
        assert!(tally.mentions(&format!("exit with signal: {}", libc::SIGKILL)));
        assert!(tally.mentions(r#"have: "before\n"  (from: actual stdout)"#));
    }
}
