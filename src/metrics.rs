use std::fmt::{Debug, Display};

use thiserror::Error;

use crate::reporting_window::ReportingWindow;

/// A source of aggregated metrics for a reporting window.
pub trait MetricSource {
    /// The record this source produces. `Default` must be the all-zero
    /// record, which stands in for both an empty result and a failed fetch.
    type Record: Default + Debug;

    /// Name of the pipeline stage, used in logs.
    fn stage(&self) -> &'static str;

    /// Issues the aggregate query for the whole window.
    fn fetch(&self, window: &ReportingWindow) -> Result<Self::Record, FetchError>;
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0:#}")]
    Request(#[from] anyhow::Error),
    #[error("response for the {report} report is missing the field `{field}`")]
    MissingField { report: &'static str, field: String },
    #[error("value {value:?} for `{field}` is not a valid number")]
    InvalidValue { field: String, value: String },
}

/// Session channels tracked per report, in column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    OrganicSocial,
    Direct,
    OrganicSearch,
    Referral,
}

pub const CHANNEL_COUNT: usize = 4;

impl Channel {
    pub const ALL: [Channel; CHANNEL_COUNT] =
        [Channel::OrganicSocial, Channel::Direct, Channel::OrganicSearch, Channel::Referral];

    /// The name used by the `sessionDefaultChannelGroup` dimension.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::OrganicSocial => "Organic Social",
            Channel::Direct => "Direct",
            Channel::OrganicSearch => "Organic Search",
            Channel::Referral => "Referral",
        }
    }

    pub fn from_group_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.as_str() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engaged-session counts per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSessions([u64; CHANNEL_COUNT]);

impl ChannelSessions {
    pub fn get(&self, channel: Channel) -> u64 {
        self.0[channel.index()]
    }

    pub fn add(&mut self, channel: Channel, sessions: u64) {
        self.0[channel.index()] += sessions;
    }

    /// The counts in column order.
    pub fn iter(&self) -> impl Iterator<Item = (Channel, u64)> + '_ {
        Channel::ALL.into_iter().map(|channel| (channel, self.get(channel)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyticsMetrics {
    pub users: u64,
    pub new_users: u64,
    pub events: u64,
    /// Total user engagement duration in seconds.
    pub engagement_seconds: u64,
    pub channel_sessions: ChannelSessions,
    /// Active users that triggered the engaged-user event.
    pub engaged_users: u64,
    /// Active users that triggered the conversion event.
    pub conversion_users: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchMetrics {
    pub clicks: u64,
    pub impressions: u64,
    /// Click-through rate as a fraction between 0 and 1.
    pub ctr: f64,
    /// Average search result position.
    pub position: f64,
}

/// Formats the average engagement time per user as `minutes:seconds`.
pub fn avg_engagement(total_seconds: u64, user_count: u64) -> String {
    if user_count == 0 {
        return "0:00".to_owned();
    }
    let per_user = total_seconds / user_count;
    format!("{}:{:02}", per_user / 60, per_user % 60)
}
