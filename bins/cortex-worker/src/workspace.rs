//! Workspace Provisioner - stages an exercise template plus submitted source
//!
//! **Per-task layout:**
//! ```text
//! <workspace_root>/cortex-<task_id>-XXXX/     (TempDir, removed on drop)
//!   workspace/                                (copy of the exercise template)
//!     ...                                     project root = dir with build descriptor
//! ```
//!
//! The provisioner only knows what the language profile tells it: which
//! descriptor marks the project root, where the main file lives, and which
//! shared tooling files sit above the exercise directory.

use anyhow::{bail, Context, Result};
use cortex_common::profile::{LanguageProfile, SourceLayout};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

/// Directories never searched for descriptors or main files
const IGNORED_DIRS: [&str; 5] = ["node_modules", "target", "__pycache__", "build", "vendor"];

/// Paths handed to the container engine.
#[derive(Debug, Clone)]
pub struct WorkspaceSetup {
    pub workspace_dir: PathBuf,
    pub project_root: PathBuf,
    pub main_file: PathBuf,
}

/// A provisioned workspace. Dropping it deletes the directory tree.
pub struct Workspace {
    _dir: TempDir,
    setup: WorkspaceSetup,
}

impl Workspace {
    pub fn setup(&self) -> &WorkspaceSetup {
        &self.setup
    }
}

#[derive(Debug, Clone)]
pub struct Provisioner {
    exercises_root: PathBuf,
    workspace_root: PathBuf,
}

impl Provisioner {
    pub fn new(exercises_root: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            exercises_root: exercises_root.into(),
            workspace_root: workspace_root.into(),
        }
    }

    /// Build a fresh workspace for one task. Blocking filesystem work.
    pub fn provision(
        &self,
        task_id: Uuid,
        exercise_path: &str,
        profile: &LanguageProfile,
        source: &[u8],
    ) -> Result<Workspace> {
        let template = self.resolve_template(exercise_path)?;

        fs::create_dir_all(&self.workspace_root).with_context(|| {
            format!("Failed to create workspace root {}", self.workspace_root.display())
        })?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("cortex-{}-", task_id))
            .tempdir_in(&self.workspace_root)
            .context("Failed to create task workspace")?;

        let workspace_dir = dir.path().join("workspace");
        copy_tree(&template, &workspace_dir)?;
        if is_empty_dir(&workspace_dir)? {
            bail!("Exercise template is empty: {}", template.display());
        }

        let project_root = match &profile.build_descriptor {
            Some(descriptor) => find_project_root(&workspace_dir, descriptor).with_context(|| {
                format!("Missing {} in {} project", descriptor, profile.name)
            })?,
            None => workspace_dir.clone(),
        };

        let search_dir = match &profile.source_layout {
            SourceLayout::Conventional { source_dir } => project_root.join(source_dir),
            SourceLayout::Flat => project_root.clone(),
        };
        let main_file = find_main_file(&search_dir, &profile.file_extension).with_context(|| {
            format!(
                "Could not find main file for {} in {}",
                profile.name,
                relative_to(&search_dir, &workspace_dir)
            )
        })?;

        write_source(&main_file, source)?;

        if let Some(shared) = &profile.shared_config {
            let shared_dir = template.ancestors().nth(shared.levels_up).with_context(|| {
                format!("{} has no ancestor {} levels up", template.display(), shared.levels_up)
            })?;
            copy_shared_files(shared_dir, &shared.files, &workspace_dir, &project_root)?;
        }

        debug!(
            task_id = %task_id,
            project_root = %project_root.display(),
            main_file = %main_file.display(),
            "Workspace provisioned"
        );

        Ok(Workspace {
            _dir: dir,
            setup: WorkspaceSetup {
                workspace_dir,
                project_root,
                main_file,
            },
        })
    }

    fn resolve_template(&self, exercise_path: &str) -> Result<PathBuf> {
        let relative = Path::new(exercise_path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("Exercise path must be relative and stay inside the exercises root: {}", exercise_path);
        }

        let template = self.exercises_root.join(relative);
        if !template.is_dir() {
            bail!("Exercise template not found: {}", template.display());
        }
        Ok(template)
    }
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.') || IGNORED_DIRS.contains(&name))
            .unwrap_or(false)
}

/// Recursive copy preserving structure. Symlinks are not followed or copied.
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).with_context(|| format!("Failed to create {}", to.display()))?;

    for entry in WalkDir::new(from).min_depth(1).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", from.display()))?;
        let relative = entry.path().strip_prefix(from)?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

fn is_empty_dir(dir: &Path) -> Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

/// Directory holding the shallowest `descriptor` file.
fn find_project_root(workspace_dir: &Path, descriptor: &str) -> Result<PathBuf> {
    WalkDir::new(workspace_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == descriptor)
        .min_by_key(|e| e.depth())
        .and_then(|e| e.path().parent().map(Path::to_path_buf))
        .with_context(|| format!("{} not found", descriptor))
}

/// First non-test file with `extension` under `search_dir`, in sorted walk order.
fn find_main_file(search_dir: &Path, extension: &str) -> Result<PathBuf> {
    if !search_dir.is_dir() {
        bail!("source directory does not exist");
    }
    WalkDir::new(search_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .find(|p| is_main_candidate(p, extension))
        .context("no candidate source file")
}

fn is_main_candidate(path: &Path, extension: &str) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(stem) = name.strip_suffix(extension) else {
        return false;
    };
    !stem.is_empty() && !is_test_stem(stem) && !stem.ends_with(".config") && !stem.ends_with(".d")
}

/// `test_x`, `x_test`, `XTest`, `x.test`, `x.spec`
pub fn is_test_stem(stem: &str) -> bool {
    stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with("Test")
        || stem.ends_with(".test")
        || stem.ends_with(".spec")
}

fn write_source(main_file: &Path, source: &[u8]) -> Result<()> {
    fs::write(main_file, source)
        .with_context(|| format!("Failed to write {}", main_file.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(main_file, fs::Permissions::from_mode(0o644))
            .with_context(|| format!("Failed to set permissions on {}", main_file.display()))?;
    }
    Ok(())
}

/// Copy the shared tooling files that exist; missing ones are skipped.
fn copy_shared_files(
    shared_dir: &Path,
    files: &[String],
    workspace_dir: &Path,
    project_root: &Path,
) -> Result<()> {
    for file in files {
        let source = shared_dir.join(file);
        if !source.is_file() {
            debug!(file = %source.display(), "Shared config not present, skipping");
            continue;
        }
        let mut targets = vec![workspace_dir.join(file)];
        if project_root != workspace_dir {
            targets.push(project_root.join(file));
        }
        for target in targets {
            fs::copy(&source, &target)
                .with_context(|| format!("Failed to copy shared config {}", file))?;
        }
    }
    Ok(())
}

fn relative_to(path: &Path, base: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}
