//! Integration tests for listcache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    /// A list directory and a config pointing the store into the same tree
    struct Sandbox {
        dir: TempDir,
        config: PathBuf,
    }

    impl Sandbox {
        fn new(backend: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let info = dir.path().join("info");
            fs::create_dir(&info).unwrap();
            fs::write(info.join("A.list"), b"/.\n/usr/bin/a\n").unwrap();
            fs::write(info.join("B.list"), b"/.\n/usr/bin/b\n").unwrap();
            fs::write(info.join("A.md5sums"), b"d41d8cd98f00b204e9800998ecf8427e  usr/bin/a\n")
                .unwrap();

            let config = dir.path().join("listcache.toml");
            fs::write(
                &config,
                format!(
                    "[source]\ndir = \"{}\"\n\n[store]\nbackend = \"{}\"\npath = \"{}\"\n",
                    info.display(),
                    backend,
                    dir.path().join("store.db").display()
                ),
            )
            .unwrap();
            Self { dir, config }
        }

        fn info(&self, name: &str) -> PathBuf {
            self.dir.path().join("info").join(name)
        }

        fn cmd(&self) -> Command {
            let mut cmd = listcache();
            cmd.arg("--config").arg(&self.config);
            cmd
        }
    }

    fn listcache() -> Command {
        let mut cmd = cargo_bin_cmd!("listcache");
        cmd.env_remove("LISTCACHE_CONFIG").env_remove("LISTCACHE_LIBRARY");
        cmd
    }

    #[test]
    fn help_displays() {
        listcache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("dpkg file lists"));
    }

    #[test]
    fn version_displays() {
        listcache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("listcache"));
    }

    #[test]
    fn config_path_honours_flag() {
        let sandbox = Sandbox::new("sqlite");
        sandbox
            .cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("listcache.toml"));
    }

    #[test]
    fn config_path_honours_env() {
        listcache()
            .env("LISTCACHE_CONFIG", "/nonexistent/alt.toml")
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/nonexistent/alt.toml"));
    }

    #[test]
    fn config_show() {
        let sandbox = Sandbox::new("hashlog");
        sandbox
            .cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[store]"))
            .stdout(predicate::str::contains("hashlog"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("bad.toml");
        fs::write(&config, "[store]\nbackend = \"leveldb\"\n").unwrap();

        listcache()
            .arg("--config")
            .arg(&config)
            .arg("check")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn check_fails_without_store() {
        let sandbox = Sandbox::new("sqlite");
        sandbox
            .cmd()
            .arg("check")
            .assert()
            .failure()
            .stdout(predicate::str::contains("does not exist"));
    }

    #[test]
    fn rebuild_then_check_and_status() {
        for backend in ["sqlite", "hashlog"] {
            let sandbox = Sandbox::new(backend);
            sandbox
                .cmd()
                .arg("rebuild")
                .assert()
                .success()
                .stdout(predicate::str::contains("2 list files cached"));

            sandbox.cmd().arg("check").assert().success();

            sandbox
                .cmd()
                .args(["status", "--format", "json"])
                .assert()
                .success()
                .stdout(predicate::str::contains("\"entries\": 2"))
                .stdout(predicate::str::contains(format!("\"backend\": \"{}\"", backend)));

            sandbox
                .cmd()
                .args(["status", "--format", "plain"])
                .assert()
                .success()
                .stdout(predicate::str::contains("fresh=true"));
        }
    }

    #[test]
    fn show_prints_exact_content() {
        let sandbox = Sandbox::new("hashlog");
        sandbox.cmd().arg("rebuild").assert().success();

        sandbox
            .cmd()
            .arg("show")
            .arg(sandbox.info("B.list"))
            .assert()
            .success()
            .stdout("/.\n/usr/bin/b\n");
    }

    #[test]
    fn show_missing_entry_fails_with_hint() {
        let sandbox = Sandbox::new("sqlite");
        sandbox.cmd().arg("rebuild").assert().success();

        sandbox
            .cmd()
            .arg("show")
            .arg(sandbox.info("A.md5sums"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("No cache entry"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn rebuild_overrides_backend_and_store() {
        let sandbox = Sandbox::new("sqlite");
        let other = sandbox.dir.path().join("other.hdb");
        sandbox
            .cmd()
            .args(["rebuild", "--backend", "hashlog", "--store"])
            .arg(&other)
            .assert()
            .success()
            .stdout(predicate::str::contains("hashlog store"));

        assert!(other.exists());
        assert!(!sandbox.dir.path().join("store.db").exists());
    }

    #[test]
    fn exec_without_library_fails() {
        let sandbox = Sandbox::new("sqlite");
        sandbox
            .cmd()
            .args(["exec", "--library", "/nonexistent/liblistcache.so", "--", "true"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Preload library not found"));
    }

    #[test]
    fn exec_propagates_exit_code_and_config() {
        let sandbox = Sandbox::new("sqlite");
        // not a real ELF object; the loader reports it and carries on
        let library = sandbox.dir.path().join("liblistcache.so");
        fs::write(&library, b"").unwrap();

        sandbox
            .cmd()
            .arg("exec")
            .arg("--library")
            .arg(&library)
            .args(["--", "sh", "-c", "echo \"$LISTCACHE_CONFIG\"; exit 3"])
            .assert()
            .code(3)
            .stdout(predicate::str::contains(path_str(&sandbox.config)));
    }

    fn path_str(path: &Path) -> String {
        path.display().to_string()
    }

    /// The preload library cargo places next to the test binary
    fn preload_library() -> PathBuf {
        Path::new(env!("CARGO_BIN_EXE_listcache")).with_file_name("liblistcache.so")
    }

    /// Replace a file's content while keeping its mtime behind the store's
    fn overwrite_backdated(path: &Path, content: &[u8]) {
        fs::write(path, content).unwrap();
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(86_400))
            .unwrap();
    }

    impl Sandbox {
        fn preloaded(&self, command: &[String]) -> Command {
            let mut cmd = self.cmd();
            cmd.arg("exec")
                .arg("--library")
                .arg(preload_library())
                .arg("--")
                .args(command)
                // keeps events flowing through process exit
                .env("LISTCACHE_LOG", "listcache=trace");
            cmd
        }
    }

    #[test]
    #[cfg_attr(not(feature = "preload"), ignore = "needs --features preload")]
    fn preloaded_reader_gets_cached_content() {
        for backend in ["sqlite", "hashlog"] {
            let sandbox = Sandbox::new(backend);
            sandbox.cmd().arg("rebuild").assert().success();
            overwrite_backdated(&sandbox.info("A.list"), b"/.\n/usr/bin/Z\n");

            sandbox
                .preloaded(&[
                    "cat".to_string(),
                    path_str(&sandbox.info("A.list")),
                    path_str(&sandbox.info("B.list")),
                ])
                .assert()
                .code(0)
                .stdout("/.\n/usr/bin/a\n/.\n/usr/bin/b\n");

            // outside the source set the real file is read
            sandbox
                .preloaded(&["cat".to_string(), path_str(&sandbox.info("A.md5sums"))])
                .assert()
                .code(0)
                .stdout("d41d8cd98f00b204e9800998ecf8427e  usr/bin/a\n");
        }
    }

    #[test]
    #[cfg_attr(not(feature = "preload"), ignore = "needs --features preload")]
    fn preloaded_writes_reach_the_filesystem() {
        for backend in ["sqlite", "hashlog"] {
            let sandbox = Sandbox::new(backend);
            sandbox.cmd().arg("rebuild").assert().success();

            // the append bypasses the cache; the newer mtime forces a rebuild
            let script = format!(
                "printf '/usr/bin/c\\n' >> '{0}' && cat '{0}'",
                path_str(&sandbox.info("B.list"))
            );
            sandbox
                .preloaded(&["sh".to_string(), "-c".to_string(), script])
                .assert()
                .code(0)
                .stdout("/.\n/usr/bin/b\n/usr/bin/c\n");

            assert_eq!(
                fs::read(sandbox.info("B.list")).unwrap(),
                b"/.\n/usr/bin/b\n/usr/bin/c\n"
            );
            sandbox
                .cmd()
                .arg("show")
                .arg(sandbox.info("B.list"))
                .assert()
                .success()
                .stdout("/.\n/usr/bin/b\n/usr/bin/c\n");
        }
    }
}
