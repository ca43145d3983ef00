use std::env;

use anyhow::{anyhow, bail, Context};

use mdt_lib::responses::Course;
use mdt_lib::session::Session;
use mdt_lib::worktree::WorkTree;

use crate::config::{global_config_candidates, global_config_target, Config, ConfigFile, Overrides};

/// Requests a token and stores it with the user's id in the global config.
pub async fn run_auth(overrides: &Overrides, user: &str, password: &str) -> anyhow::Result<()> {
    let target = global_config_target(&global_config_candidates())
        .ok_or_else(|| anyhow!("no place for a global config, set HOME or XDG_CONFIG_HOME"))?;
    let existing = ConfigFile::load(&target)?.unwrap_or_default();
    let config = Config::resolve(overrides, existing.clone());

    let token = Session::login(&config.url, user, password, &config.service)
        .await
        .context("requesting a token")?;
    let info = Session::new(&config.url, &token.token)
        .site_info()
        .await
        .context("reading site info")?;

    let updated = existing.overlay(ConfigFile {
        url: Some(config.url),
        service: Some(config.service),
        token: Some(token.token),
        user_id: Some(info.userid),
        user_name: Some(info.username.clone()),
        ..Default::default()
    });
    updated.save(&target)?;

    println!(
        "✓ Logged in to {} as {} ({})",
        info.sitename, info.fullname, info.username
    );
    println!("Saved credentials to {}", target.display());
    Ok(())
}

/// Keeps the courses named by `course_ids`, or all of them when none are
/// named. Unknown ids are an error.
pub fn choose_courses(available: Vec<Course>, course_ids: &[i64]) -> anyhow::Result<Vec<Course>> {
    if course_ids.is_empty() {
        return Ok(available);
    }
    let unknown: Vec<String> = course_ids
        .iter()
        .filter(|id| !available.iter().any(|c| c.id == **id))
        .map(ToString::to_string)
        .collect();
    if !unknown.is_empty() {
        let known: Vec<String> = available
            .iter()
            .map(|c| format!("{} ({})", c.id, c.shortname))
            .collect();
        bail!(
            "not enrolled in course {}; enrolled: {}",
            unknown.join(", "),
            known.join(", ")
        );
    }
    Ok(available
        .into_iter()
        .filter(|c| course_ids.contains(&c.id))
        .collect())
}

/// Creates a work tree in the current directory for the chosen courses.
pub async fn run_init(overrides: &Overrides, course_ids: &[i64]) -> anyhow::Result<()> {
    let root = env::current_dir()?;
    let config = Config::load(overrides, None)?;
    let session = config.session()?;

    let available = session.users_courses(config.user_id()?).await?;
    let courses = choose_courses(available, course_ids)?;

    let tree = WorkTree::init(&root)?;
    tree.set_courses(&courses)?;
    ConfigFile {
        course_ids: Some(courses.iter().map(|c| c.id).collect()),
        ..Default::default()
    }
    .save(&tree.config_path())?;

    println!("Initialized work tree in {}", root.display());
    for course in &courses {
        println!("  {:>6}  {}", course.id, course.fullname);
    }
    Ok(())
}
