//! Three-column board projection.

use rxdesk_core::ConversationId;
use rxdesk_store::{Conversation, ConversationStatus};
use serde::Serialize;

/// One board column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    /// The status this column shows.
    pub status: ConversationStatus,
    /// Conversations in mirror order.
    pub conversations: Vec<Conversation>,
}

impl Column {
    /// Number of conversations in the column.
    #[must_use]
    pub fn count(&self) -> usize {
        self.conversations.len()
    }
}

/// The dashboard board: conversations grouped by status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Board {
    columns: [Column; 3],
    new_arrivals: Vec<ConversationId>,
}

impl Board {
    /// Group `records` by status, keeping their order within each column.
    #[must_use]
    pub fn project(records: &[Conversation]) -> Self {
        let mut columns = ConversationStatus::ALL.map(|status| Column {
            status,
            conversations: Vec::new(),
        });
        let mut new_arrivals = Vec::new();

        for record in records {
            columns[Self::index(record.status)]
                .conversations
                .push(record.clone());
            if record.is_new {
                new_arrivals.push(record.id.clone());
            }
        }

        Self {
            columns,
            new_arrivals,
        }
    }

    const fn index(status: ConversationStatus) -> usize {
        match status {
            ConversationStatus::Ongoing => 0,
            ConversationStatus::Waiting => 1,
            ConversationStatus::Completed => 2,
        }
    }

    /// The columns in board order.
    #[must_use]
    pub const fn columns(&self) -> &[Column; 3] {
        &self.columns
    }

    /// The column for `status`.
    #[must_use]
    pub fn column(&self, status: ConversationStatus) -> &Column {
        &self.columns[Self::index(status)]
    }

    /// Number of conversations with `status`.
    #[must_use]
    pub fn count(&self, status: ConversationStatus) -> usize {
        self.column(status).count()
    }

    /// Total number of conversations on the board.
    #[must_use]
    pub fn total(&self) -> usize {
        self.columns.iter().map(Column::count).sum()
    }

    /// Ids of conversations that arrived live and are not yet acknowledged.
    #[must_use]
    pub fn new_arrivals(&self) -> &[ConversationId] {
        &self.new_arrivals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::conversation;

    fn with_status(id: &str, minutes: i64, status: ConversationStatus) -> Conversation {
        let mut record = conversation(id, minutes);
        record.status = status;
        record
    }

    #[test]
    fn groups_by_status_in_order() {
        let records = vec![
            with_status("1", 30, ConversationStatus::Waiting),
            with_status("2", 20, ConversationStatus::Ongoing),
            with_status("3", 10, ConversationStatus::Waiting),
        ];
        let board = Board::project(&records);

        let waiting: Vec<_> = board
            .column(ConversationStatus::Waiting)
            .conversations
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(waiting, vec!["1", "3"]);
        assert_eq!(board.count(ConversationStatus::Ongoing), 1);
        assert_eq!(board.count(ConversationStatus::Completed), 0);
        assert_eq!(board.total(), 3);
    }

    #[test]
    fn columns_follow_workflow_order() {
        let board = Board::project(&[]);
        let statuses: Vec<_> = board.columns().iter().map(|c| c.status).collect();
        assert_eq!(statuses, ConversationStatus::ALL.to_vec());
    }

    #[test]
    fn lists_new_arrivals() {
        let mut fresh = conversation("2", 5);
        fresh.is_new = true;
        let board = Board::project(&[fresh, conversation("1", 1)]);
        assert_eq!(board.new_arrivals(), &[ConversationId::new("2").unwrap()]);
    }
}
