//! Core services: import, attribution and technical-detail lookup

pub mod contribution_service;
pub mod contribution_view;
pub mod signal_hydrator;
pub mod technical_details;

pub use contribution_service::{
    reconstruct_entity, top_contributors, ContributionRecord, ContributionService, ContributionServiceError, Entity,
    HierarchicalContributions, SortField,
};
pub use contribution_view::{to_response, ContributionResponse, HierarchicalContributionsResponse};
pub use signal_hydrator::{prepare_signal, HydrateOptions, ImportStats, MalformedRecord, SignalHydrator};
pub use technical_details::{TechnicalDetails, TechnicalDetailsService};
