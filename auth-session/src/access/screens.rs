//! The marketplace's screens and the capability each one is guarded by.

use super::gate::AccessDecision;
use crate::models::CapabilityLevel;
use crate::services::AuthSnapshot;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    Discover,
    PropertyDetail,
    Blog,
    BlogPost,
    UploadProperty,
    Visits,
    Negotiations,
    FinancialAnalysis,
    Favorites,
    Cases,
    Chat,
    Admin,
    Analytics,
    Dashboard,
    MyProperties,
    Documents,
    Notifications,
}

impl Screen {
    pub const ALL: [Screen; 17] = [
        Screen::Discover,
        Screen::PropertyDetail,
        Screen::Blog,
        Screen::BlogPost,
        Screen::UploadProperty,
        Screen::Visits,
        Screen::Negotiations,
        Screen::FinancialAnalysis,
        Screen::Favorites,
        Screen::Cases,
        Screen::Chat,
        Screen::Admin,
        Screen::Analytics,
        Screen::Dashboard,
        Screen::MyProperties,
        Screen::Documents,
        Screen::Notifications,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::PropertyDetail => "property-detail",
            Self::Blog => "blog",
            Self::BlogPost => "blog-post",
            Self::UploadProperty => "upload-property",
            Self::Visits => "visits",
            Self::Negotiations => "negotiations",
            Self::FinancialAnalysis => "financial-analysis",
            Self::Favorites => "favorites",
            Self::Cases => "cases",
            Self::Chat => "chat",
            Self::Admin => "admin",
            Self::Analytics => "analytics",
            Self::Dashboard => "dashboard",
            Self::MyProperties => "my-properties",
            Self::Documents => "documents",
            Self::Notifications => "notifications",
        }
    }

    /// Unknown keys land on the discovery screen.
    pub fn from_key(key: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|screen| screen.key() == key)
            .unwrap_or(Self::Discover)
    }

    /// `None` for public screens.
    pub fn required_capability(&self) -> Option<CapabilityLevel> {
        use CapabilityLevel::*;
        match self {
            Self::Discover | Self::PropertyDetail | Self::Blog | Self::BlogPost => None,
            Self::Visits
            | Self::Favorites
            | Self::Dashboard
            | Self::Documents
            | Self::Notifications => Some(Registered),
            Self::UploadProperty
            | Self::Negotiations
            | Self::FinancialAnalysis
            | Self::MyProperties => Some(Verified),
            Self::Cases | Self::Chat => Some(Lawyer),
            Self::Admin | Self::Analytics => Some(Superadmin),
        }
    }

    pub fn is_public(&self) -> bool {
        self.required_capability().is_none()
    }

    /// Public screens are never gated, not even while loading.
    pub fn access(&self, snapshot: &AuthSnapshot) -> AccessDecision {
        match self.required_capability() {
            None => AccessDecision::Authorized,
            required => snapshot.access(required),
        }
    }

    /// Screens `snapshot` may open right now, in catalog order.
    pub fn accessible(snapshot: &AuthSnapshot) -> Vec<Screen> {
        Self::ALL
            .into_iter()
            .filter(|screen| screen.access(snapshot).is_authorized())
            .collect()
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}
