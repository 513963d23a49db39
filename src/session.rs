use anyhow::Result;

use crate::data::LibraryService;
use crate::library::DirectoryListing;
use crate::path::LibraryPath;

/// How listing responses that arrive out of order are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseOrdering {
    /// Every response is applied as it arrives.
    #[default]
    LastArrival,
    /// Only the response to the most recently issued request is applied.
    LatestRequest,
}

impl ResponseOrdering {
    pub fn from_config(latest_request_wins: bool) -> Self {
        if latest_request_wins {
            ResponseOrdering::LatestRequest
        } else {
            ResponseOrdering::LastArrival
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRequest {
    pub token: u64,
    pub path: LibraryPath,
}

#[derive(Debug)]
pub enum NavigationOutcome {
    Applied(DirectoryListing),
    Failed(anyhow::Error),
    Stale { token: u64 },
}

/// Browsing context: where the user is, which listing request is newest,
/// and which video is open.
#[derive(Debug, Default)]
pub struct Session {
    current_path: LibraryPath,
    next_token: u64,
    latest_token: u64,
    ordering: ResponseOrdering,
    open_video: Option<LibraryPath>,
}

impl Session {
    pub fn new(ordering: ResponseOrdering) -> Self {
        Self {
            ordering,
            ..Self::default()
        }
    }

    pub fn current_path(&self) -> &LibraryPath {
        &self.current_path
    }

    pub fn ordering(&self) -> ResponseOrdering {
        self.ordering
    }

    pub fn can_go_back(&self) -> bool {
        !self.current_path.is_root()
    }

    pub fn begin_navigation(&mut self, path: LibraryPath) -> NavigationRequest {
        self.next_token += 1;
        self.latest_token = self.next_token;
        tracing::debug!(token = self.latest_token, %path, "navigation requested");
        NavigationRequest {
            token: self.latest_token,
            path,
        }
    }

    /// Starts navigation to the parent, or does nothing at the root.
    pub fn navigate_back(&mut self) -> Option<NavigationRequest> {
        let parent = self.current_path.parent()?;
        Some(self.begin_navigation(parent))
    }

    pub fn complete_navigation(
        &mut self,
        token: u64,
        result: Result<DirectoryListing>,
    ) -> NavigationOutcome {
        if self.ordering == ResponseOrdering::LatestRequest && token != self.latest_token {
            tracing::debug!(token, latest = self.latest_token, "discarding stale listing");
            return NavigationOutcome::Stale { token };
        }
        match result {
            Ok(listing) => {
                self.current_path = listing.path.clone();
                NavigationOutcome::Applied(listing)
            }
            Err(err) => NavigationOutcome::Failed(err),
        }
    }

    /// Runs both halves of a navigation inline.
    pub fn navigate_to(
        &mut self,
        service: &dyn LibraryService,
        path: LibraryPath,
    ) -> NavigationOutcome {
        let request = self.begin_navigation(path);
        let result = service.list_directory(&request.path);
        self.complete_navigation(request.token, result)
    }

    pub fn open_video(&mut self, path: LibraryPath) {
        self.open_video = Some(path);
    }

    pub fn close_video(&mut self) -> Option<LibraryPath> {
        self.open_video.take()
    }

    pub fn current_video(&self) -> Option<&LibraryPath> {
        self.open_video.as_ref()
    }
}
