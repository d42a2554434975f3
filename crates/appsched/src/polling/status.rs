//! Results reported when a MAC data poll completes.

/// Outcome of one data poll sent to the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// The parent acknowledged the poll and had data pending.
    Success,
    /// The parent acknowledged the poll with nothing pending.
    NoData,
    /// No MAC acknowledgement arrived from the parent.
    NoAckReceived,
    ChannelAccessFailure,
    TxCcaFail,
    TxBlocked,
    TxScheduleFail,
    /// Any other stack status code.
    Other(u8),
}

impl PollStatus {
    /// The poll never left the radio because the channel was busy. These
    /// do not say anything about the parent.
    #[must_use]
    pub fn is_channel_busy(self) -> bool {
        matches!(
            self,
            Self::ChannelAccessFailure | Self::TxCcaFail | Self::TxBlocked | Self::TxScheduleFail
        )
    }
}
