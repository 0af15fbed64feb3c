use crate::common::file::{FileSpec, write_file};
use crate::common::redirect_temp_dir;
use assert_cmd::Command;
use assert_fs::TempDir;
use derive_new::new;
use rstest::fixture;
use std::path::Path;

#[fixture]
pub fn repository_dir() -> TempDir {
    redirect_temp_dir();
    TempDir::new().expect("Failed to create temp dir")
}

/// An empty git repository on branch `main`
#[fixture]
pub fn git_repository(repository_dir: TempDir) -> TempDir {
    run_git_command(repository_dir.path(), &["init", "-q", "-b", "main"])
        .assert()
        .success();

    repository_dir
}

pub fn run_prindex_command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("prindex").expect("Failed to find prindex binary");
    cmd.env("PRINDEX_REPO", dir);
    cmd.env_remove("RUST_LOG");
    cmd.current_dir(dir);
    for arg in args {
        cmd.arg(arg);
    }
    cmd
}

pub fn run_git_command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(dir);
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("HOME", dir);
    for arg in args {
        cmd.arg(arg);
    }
    cmd
}

#[derive(Debug, Clone, new)]
struct RandomAuthor {
    name: String,
    email: String,
}

fn generate_random_author() -> RandomAuthor {
    use fake::Fake;
    use fake::faker::internet::en::FreeEmail;
    use fake::faker::name::en::Name;

    let name = Name().fake::<String>().replace(" ", "_");
    let email = FreeEmail().fake::<String>();
    RandomAuthor::new(name, email)
}

/// Write `files`, stage everything and commit at `date`, returning the commit id
///
/// `date` uses git's `%Y-%m-%d %H:%M:%S %z` format.
pub fn git_commit(dir: &Path, files: &[(&str, &str)], message: &str, date: &str) -> String {
    for (path, content) in files {
        write_file(FileSpec::new(dir.join(path), content.to_string()));
    }
    run_git_command(dir, &["add", "-A"]).assert().success();

    let author = generate_random_author();
    run_git_command(dir, &["commit", "-q", "--allow-empty", "-m", message])
        .envs(vec![
            ("GIT_AUTHOR_NAME", author.name.as_str()),
            ("GIT_AUTHOR_EMAIL", author.email.as_str()),
            ("GIT_AUTHOR_DATE", date),
            ("GIT_COMMITTER_NAME", author.name.as_str()),
            ("GIT_COMMITTER_EMAIL", author.email.as_str()),
            ("GIT_COMMITTER_DATE", date),
        ])
        .assert()
        .success();

    rev_parse(dir, "HEAD")
}

/// Merge `revision` into the current branch without fast-forwarding
pub fn git_merge(dir: &Path, revision: &str, date: &str) -> String {
    run_git_command(dir, &["merge", "-q", "--no-ff", "--no-edit", revision])
        .envs(vec![
            ("GIT_AUTHOR_NAME", "merger"),
            ("GIT_AUTHOR_EMAIL", "merger@example.com"),
            ("GIT_AUTHOR_DATE", date),
            ("GIT_COMMITTER_NAME", "merger"),
            ("GIT_COMMITTER_EMAIL", "merger@example.com"),
            ("GIT_COMMITTER_DATE", date),
        ])
        .assert()
        .success();

    rev_parse(dir, "HEAD")
}

pub fn git_checkout(dir: &Path, args: &[&str]) {
    let mut full_args = vec!["checkout", "-q"];
    full_args.extend_from_slice(args);
    run_git_command(dir, &full_args).assert().success();
}

pub fn rev_parse(dir: &Path, revision: &str) -> String {
    let output = run_git_command(dir, &["rev-parse", revision])
        .output()
        .expect("Failed to run git rev-parse");
    assert!(output.status.success(), "unknown revision {revision}");

    String::from_utf8(output.stdout)
        .expect("rev-parse output is UTF-8")
        .trim()
        .to_string()
}

/// Move every object into a single packfile, deltified where possible
pub fn pack_objects(dir: &Path) {
    run_git_command(dir, &["repack", "-q", "-a", "-d", "-f", "--depth=50", "--window=50"])
        .assert()
        .success();
    run_git_command(dir, &["prune-packed"]).assert().success();
}
