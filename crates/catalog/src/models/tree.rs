use super::LocalFile;
use std::collections::HashMap;
use std::path::PathBuf;

/// Live metadata snapshot of the catalog, rooted at one file.
///
/// Files are held in an arena keyed by id, with child lists kept per parent
/// (sorted by name, then id). Nothing in here is obsolete.
#[derive(Debug, Clone)]
pub struct LocalTree {
    root_id: String,
    files: HashMap<String, LocalFile>,
    children: HashMap<String, Vec<String>>,
}

impl LocalTree {
    /// Build a tree from live files.
    ///
    /// Returns `None` if `root_id` isn't among them. Files whose parent isn't
    /// in the set (other than the root) are unreachable and dropped.
    pub fn from_files(root_id: &str, files: impl IntoIterator<Item = LocalFile>) -> Option<Self> {
        let mut files: HashMap<String, LocalFile> = files.into_iter().map(|f| (f.meta.id.clone(), f)).collect();
        if !files.contains_key(root_id) {
            return None;
        }
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for file in files.values() {
            if file.meta.id == root_id {
                continue;
            }
            if let Some(parent) = &file.meta.parent_id {
                children.entry(parent.clone()).or_default().push(file.meta.id.clone());
            }
        }
        for ids in children.values_mut() {
            ids.sort_by(|a, b| files[a].meta.name.cmp(&files[b].meta.name).then_with(|| a.cmp(b)));
        }
        let mut tree = Self { root_id: root_id.to_string(), files: HashMap::new(), children };
        // Keep only what's reachable from the root.
        let reachable: Vec<String> = tree.walk().into_iter().map(str::to_string).collect();
        for id in reachable {
            if let Some(file) = files.remove(&id) {
                tree.files.insert(id, file);
            }
        }
        tree.children.retain(|parent, _| tree.files.contains_key(parent));
        Some(tree)
    }

    /// Ids in pre-order, following child lists only.
    fn walk(&self) -> Vec<&str> {
        let mut order = Vec::new();
        let mut stack = vec![self.root_id.as_str()];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(children) = self.children.get(id) {
                stack.extend(children.iter().rev().map(String::as_str));
            }
        }
        order
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn root(&self) -> &LocalFile {
        &self.files[&self.root_id]
    }

    pub fn get(&self, id: &str) -> Option<&LocalFile> {
        self.files.get(id)
    }

    pub fn children(&self, id: &str) -> impl Iterator<Item = &LocalFile> {
        self.children.get(id).into_iter().flatten().filter_map(|child| self.files.get(child))
    }

    /// Every file, parents before their children.
    pub fn flatten(&self) -> Vec<&LocalFile> {
        self.walk().into_iter().filter_map(|id| self.files.get(id)).collect()
    }

    /// Path of a file made of the names below the root, e.g. `docs/notes.txt`.
    ///
    /// The root itself has an empty path.
    pub fn virtual_path(&self, id: &str) -> Option<PathBuf> {
        let mut names = Vec::new();
        let mut current = self.files.get(id)?;
        while current.meta.id != self.root_id {
            names.push(current.meta.name.as_str());
            current = self.files.get(current.meta.parent_id.as_deref()?)?;
        }
        Some(names.into_iter().rev().collect())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
