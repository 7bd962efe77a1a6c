//! The bookmark source: where the tree of folders and bookmarks comes from.
//!
//! The production implementation reads a Chrome/Chromium-format `Bookmarks`
//! JSON file. `StaticSource` serves a fixed tree and is what tests wire in.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("no bookmarks file configured")]
    NotConfigured,

    #[error("failed to read bookmarks file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse bookmarks file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One bookmark as the source presents it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBookmark {
    pub id: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Default)]
pub struct Folder {
    pub id: String,
    pub title: String,
    pub folders: Vec<Folder>,
    pub bookmarks: Vec<SourceBookmark>,
}

/// The whole tree as of one sync call.
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    pub roots: Vec<Folder>,
}

impl TreeSnapshot {
    /// Every bookmark reachable from the selected folder ids, depth-first.
    /// Selecting a folder selects its entire subtree. Duplicate ids keep
    /// their first occurrence.
    pub fn reachable_from(&self, selected_folder_ids: &[String]) -> Vec<SourceBookmark> {
        let wanted: HashSet<&str> = selected_folder_ids.iter().map(|s| s.as_str()).collect();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for root in &self.roots {
            collect_reachable(root, false, &wanted, &mut seen, &mut out);
        }
        out
    }

    /// Flat `(id, path)` listing of every folder, paths slash-joined from
    /// the root. Used by the CLI so the user can pick what to track.
    pub fn folder_listing(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for root in &self.roots {
            list_folders(root, "", &mut out);
        }
        out
    }
}

fn collect_reachable<'a>(
    folder: &'a Folder,
    inherited: bool,
    wanted: &HashSet<&str>,
    seen: &mut HashSet<&'a str>,
    out: &mut Vec<SourceBookmark>,
) {
    let selected = inherited || wanted.contains(folder.id.as_str());
    if selected {
        for bookmark in &folder.bookmarks {
            if seen.insert(bookmark.id.as_str()) {
                out.push(bookmark.clone());
            }
        }
    }
    for child in &folder.folders {
        collect_reachable(child, selected, wanted, seen, out);
    }
}

fn list_folders(folder: &Folder, prefix: &str, out: &mut Vec<(String, String)>) {
    let path = if prefix.is_empty() {
        folder.title.clone()
    } else {
        format!("{prefix}/{}", folder.title)
    };
    out.push((folder.id.clone(), path.clone()));
    for child in &folder.folders {
        list_folders(child, &path, out);
    }
}

pub trait BookmarkSource: Send {
    fn snapshot(&self) -> Result<TreeSnapshot, SourceError>;
}

/// Chrome/Chromium `Bookmarks` file. Folder nodes carry `type: "folder"`
/// and `children`; leaves carry `type: "url"`.
pub struct BookmarksFile {
    path: PathBuf,
}

impl BookmarksFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[derive(Deserialize)]
struct ChromeFile {
    roots: BTreeMap<String, ChromeNode>,
}

#[derive(Deserialize)]
struct ChromeNode {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    children: Vec<ChromeNode>,
}

impl BookmarkSource for BookmarksFile {
    fn snapshot(&self) -> Result<TreeSnapshot, SourceError> {
        if self.path.as_os_str().is_empty() {
            return Err(SourceError::NotConfigured);
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let file: ChromeFile = serde_json::from_str(&raw)?;

        let roots = file
            .roots
            .values()
            .filter(|node| node.kind == "folder")
            .map(convert_folder)
            .collect();

        Ok(TreeSnapshot { roots })
    }
}

fn convert_folder(node: &ChromeNode) -> Folder {
    let mut folder = Folder {
        id: node.id.clone(),
        title: node.name.clone(),
        ..Default::default()
    };

    for child in &node.children {
        match child.kind.as_str() {
            "folder" => folder.folders.push(convert_folder(child)),
            "url" => folder.bookmarks.push(SourceBookmark {
                id: child.id.clone(),
                title: child.name.clone(),
                url: child.url.clone(),
            }),
            other => log::debug!("skipping bookmark node of type '{other}'"),
        }
    }

    folder
}

/// A source that always serves the same tree.
pub struct StaticSource {
    tree: TreeSnapshot,
}

impl StaticSource {
    pub fn new(tree: TreeSnapshot) -> Self {
        Self { tree }
    }
}

impl BookmarkSource for StaticSource {
    fn snapshot(&self) -> Result<TreeSnapshot, SourceError> {
        Ok(self.tree.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bookmark(id: &str, title: &str) -> SourceBookmark {
        SourceBookmark {
            id: id.to_string(),
            title: title.to_string(),
            url: format!("https://example.com/{id}"),
        }
    }

    fn fixture_tree() -> TreeSnapshot {
        TreeSnapshot {
            roots: vec![Folder {
                id: "root".into(),
                title: "Bookmarks bar".into(),
                folders: vec![
                    Folder {
                        id: "tech".into(),
                        title: "Tech".into(),
                        folders: vec![Folder {
                            id: "rust".into(),
                            title: "Rust".into(),
                            bookmarks: vec![bookmark("b3", "The Book")],
                            ..Default::default()
                        }],
                        bookmarks: vec![bookmark("b2", "LWN")],
                    },
                    Folder {
                        id: "news".into(),
                        title: "News".into(),
                        bookmarks: vec![bookmark("b4", "Weather")],
                        ..Default::default()
                    },
                ],
                bookmarks: vec![bookmark("b1", "Top level")],
            }],
        }
    }

    #[test]
    fn selection_covers_the_whole_subtree() {
        let tree = fixture_tree();
        let reachable = tree.reachable_from(&["tech".to_string()]);
        let ids: Vec<&str> = reachable.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["b2", "b3"]);
    }

    #[test]
    fn unselected_folders_contribute_nothing() {
        let tree = fixture_tree();
        let reachable = tree.reachable_from(&["news".to_string()]);
        let ids: Vec<&str> = reachable.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["b4"]);
    }

    #[test]
    fn selecting_the_root_reaches_everything() {
        let tree = fixture_tree();
        let reachable = tree.reachable_from(&["root".to_string()]);
        assert_eq!(reachable.len(), 4);
    }

    #[test]
    fn empty_selection_is_empty() {
        assert!(fixture_tree().reachable_from(&[]).is_empty());
    }

    #[test]
    fn folder_listing_shows_paths() {
        let tree = fixture_tree();
        let listing = tree.folder_listing();
        assert!(listing.contains(&("rust".to_string(), "Bookmarks bar/Tech/Rust".to_string())));
        assert!(listing.contains(&("news".to_string(), "Bookmarks bar/News".to_string())));
    }

    #[test]
    fn chrome_file_parses_into_a_tree() {
        let raw = r#"{
            "checksum": "abc",
            "roots": {
                "bookmark_bar": {
                    "children": [
                        { "id": "10", "name": "Example", "type": "url", "url": "https://example.com/" },
                        {
                            "id": "11", "name": "Sub", "type": "folder",
                            "children": [
                                { "id": "12", "name": "Nested", "type": "url", "url": "https://nested.example/" }
                            ]
                        }
                    ],
                    "id": "1",
                    "name": "Bookmarks bar",
                    "type": "folder"
                },
                "other": { "children": [], "id": "2", "name": "Other bookmarks", "type": "folder" }
            },
            "version": 1
        }"#;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Bookmarks");
        std::fs::write(&path, raw).unwrap();

        let tree = BookmarksFile::new(&path).snapshot().unwrap();
        assert_eq!(tree.roots.len(), 2);

        let bar = tree.roots.iter().find(|f| f.id == "1").unwrap();
        assert_eq!(bar.bookmarks.len(), 1);
        assert_eq!(bar.bookmarks[0].url, "https://example.com/");
        assert_eq!(bar.folders.len(), 1);
        assert_eq!(bar.folders[0].bookmarks[0].id, "12");

        let reachable = tree.reachable_from(&["1".to_string()]);
        assert_eq!(reachable.len(), 2);
    }
}
