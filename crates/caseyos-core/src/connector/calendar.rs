//! Calendar capability: availability and event creation.

use super::ConnectorError;

/// A busy interval on a calendar.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BusyInterval {
    pub start: String,
    pub end: String,
}

/// A proposed meeting slot, in the contact's local timezone.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MeetingSlot {
    /// Start time, ISO-8601 with offset.
    pub start: String,
    /// End time, ISO-8601 with offset.
    pub end: String,
    /// IANA timezone the slot was computed in.
    pub timezone: String,
}

/// Calendar provider capability.
#[async_trait::async_trait]
pub trait CalendarConnector: Send + Sync {
    /// Busy intervals across the given calendars within a range.
    async fn freebusy(
        &self,
        range_start: &str,
        range_end: &str,
        calendars: &[String],
    ) -> Result<Vec<BusyInterval>, ConnectorError>;

    /// Propose open meeting slots.
    ///
    /// Slots fall within local business hours in `timezone`, skip weekends,
    /// and start 1–3 business days out.
    async fn propose_slots(
        &self,
        duration_minutes: u32,
        count: usize,
        business_hours: (u32, u32),
        timezone: &str,
    ) -> Result<Vec<MeetingSlot>, ConnectorError>;

    /// Create a calendar event. Returns the event id.
    async fn create_event(
        &self,
        title: &str,
        start: &str,
        end: &str,
        attendees: &[String],
    ) -> Result<String, ConnectorError>;
}
