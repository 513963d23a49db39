//! Pure mapping from directory listings and search results to tiles.

use crate::api::Endpoints;
use crate::path::LibraryPath;

/// Listings with fewer entries than this use the roomy layout.
pub const FEW_ITEMS_THRESHOLD: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
    pub path: LibraryPath,
    pub directories: Vec<String>,
    pub files: Vec<String>,
}

impl DirectoryListing {
    pub fn len(&self) -> usize {
        self.directories.len() + self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileAction {
    Navigate(LibraryPath),
    Play(LibraryPath),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub label: String,
    pub action: TileAction,
    /// Reference only; the image is fetched when the tile is looked at.
    pub thumbnail_url: Option<String>,
}

impl Tile {
    pub fn path(&self) -> &LibraryPath {
        match &self.action {
            TileAction::Navigate(path) | TileAction::Play(path) => path,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self.action, TileAction::Play(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Density {
    Few,
    #[default]
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TileSet {
    pub heading: String,
    pub tiles: Vec<Tile>,
    pub density: Density,
    pub show_back: bool,
}

impl TileSet {
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

pub fn density_for(entries: usize) -> Density {
    if entries < FEW_ITEMS_THRESHOLD {
        Density::Few
    } else {
        Density::Default
    }
}

pub fn render(listing: &DirectoryListing, endpoints: &Endpoints) -> TileSet {
    let mut tiles = Vec::with_capacity(listing.len());

    for name in &listing.directories {
        match listing.path.join(name) {
            Ok(path) => tiles.push(Tile {
                label: format!("{name}/"),
                action: TileAction::Navigate(path),
                thumbnail_url: None,
            }),
            Err(err) => tracing::warn!(%name, %err, "skipping directory with unusable name"),
        }
    }

    for name in &listing.files {
        match listing.path.join(name) {
            Ok(path) => tiles.push(video_tile(name.clone(), path, endpoints)),
            Err(err) => tracing::warn!(%name, %err, "skipping file with unusable name"),
        }
    }

    TileSet {
        heading: listing.path.to_string(),
        tiles,
        density: density_for(listing.len()),
        show_back: !listing.path.is_root(),
    }
}

/// Search hits are always playable paths; no directories, no way back.
pub fn render_search(query: &str, results: &[LibraryPath], endpoints: &Endpoints) -> TileSet {
    let tiles = results
        .iter()
        .map(|path| video_tile(path.as_server_path(), path.clone(), endpoints))
        .collect();

    TileSet {
        heading: format!("Search: {query}"),
        tiles,
        density: density_for(results.len()),
        show_back: false,
    }
}

fn video_tile(label: String, path: LibraryPath, endpoints: &Endpoints) -> Tile {
    Tile {
        label,
        thumbnail_url: Some(endpoints.thumbnail(&path)),
        action: TileAction::Play(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints::new("http://media.test:5000").unwrap()
    }

    fn listing(path: &str, dirs: usize, files: usize) -> DirectoryListing {
        DirectoryListing {
            path: LibraryPath::parse(path).unwrap(),
            directories: (0..dirs).map(|i| format!("dir{i}")).collect(),
            files: (0..files).map(|i| format!("clip{i}.mp4")).collect(),
        }
    }

    #[test]
    fn directories_navigate_and_files_play() {
        let tiles = render(
            &DirectoryListing {
                path: LibraryPath::parse("Movies").unwrap(),
                directories: vec!["Action".into()],
                files: vec!["clip one.mkv".into()],
            },
            &endpoints(),
        );
        assert_eq!(tiles.heading, "/Movies");
        assert!(tiles.show_back);
        assert_eq!(tiles.tiles[0].label, "Action/");
        assert_eq!(
            tiles.tiles[0].action,
            TileAction::Navigate(LibraryPath::parse("Movies/Action").unwrap())
        );
        assert_eq!(tiles.tiles[0].thumbnail_url, None);
        assert_eq!(
            tiles.tiles[1].action,
            TileAction::Play(LibraryPath::parse("Movies/clip one.mkv").unwrap())
        );
        assert_eq!(
            tiles.tiles[1].thumbnail_url.as_deref(),
            Some("http://media.test:5000/api/thumb/Movies/clip%20one.mkv")
        );
    }

    #[test]
    fn density_threshold_is_strict() {
        assert_eq!(render(&listing("", 4, 5), &endpoints()).density, Density::Few);
        assert_eq!(
            render(&listing("", 4, 6), &endpoints()).density,
            Density::Default
        );
        assert_eq!(render(&listing("", 0, 0), &endpoints()).density, Density::Few);
    }

    #[test]
    fn root_listing_hides_back() {
        assert!(!render(&listing("", 1, 1), &endpoints()).show_back);
    }

    #[test]
    fn search_results_only_play() {
        let results = vec![
            LibraryPath::parse("Movies/a.mp4").unwrap(),
            LibraryPath::parse("Shows/S1/b.avi").unwrap(),
        ];
        let tiles = render_search("a", &results, &endpoints());
        assert!(!tiles.show_back);
        assert!(tiles.tiles.iter().all(Tile::is_video));
        assert_eq!(tiles.tiles[1].label, "Shows/S1/b.avi");
        assert_eq!(tiles.heading, "Search: a");
    }
}
