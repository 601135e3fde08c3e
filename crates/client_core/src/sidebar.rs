//! Most-recently-active ordering of conversation partners.

use shared::{
    domain::{LastMessageSummary, UserId, UserProfile},
    protocol::PartnerSummary,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarEntry {
    pub partner: UserProfile,
    pub last_message: Option<LastMessageSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sidebar {
    entries: Vec<SidebarEntry>,
}

impl Sidebar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the list with a freshly fetched one, keeping the server's order.
    pub fn load(&mut self, partners: Vec<PartnerSummary>) {
        self.entries = partners
            .into_iter()
            .map(|summary| SidebarEntry {
                partner: summary.profile,
                last_message: summary.last_message,
            })
            .collect();
    }

    pub fn entries(&self) -> &[SidebarEntry] {
        &self.entries
    }

    pub fn order(&self) -> Vec<UserId> {
        self.entries.iter().map(|e| e.partner.id.clone()).collect()
    }

    pub fn get(&self, partner_id: &UserId) -> Option<&SidebarEntry> {
        self.entries.iter().find(|e| &e.partner.id == partner_id)
    }

    /// Moves `partner_id` to the front with a new summary. Partners that are not listed
    /// are ignored.
    pub fn touch(&mut self, partner_id: &UserId, summary: LastMessageSummary) -> bool {
        let Some(index) = self.entries.iter().position(|e| &e.partner.id == partner_id) else {
            return false;
        };
        let mut entry = self.entries.remove(index);
        entry.last_message = Some(summary);
        self.entries.insert(0, entry);
        true
    }

    /// Drops the cached summary without moving the partner.
    pub fn clear_summary(&mut self, partner_id: &UserId) {
        if let Some(entry) = self.entries.iter_mut().find(|e| &e.partner.id == partner_id) {
            entry.last_message = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn partner(id: &str) -> PartnerSummary {
        PartnerSummary {
            profile: UserProfile {
                id: UserId::from(id),
                username: id.into(),
                full_name: id.into(),
                bio: String::new(),
                profile_pic: String::new(),
                created_at: Utc.timestamp_millis_opt(0).unwrap(),
            },
            last_message: None,
        }
    }

    fn summary(text: &str, millis: i64) -> LastMessageSummary {
        LastMessageSummary {
            text: text.into(),
            created_at: Utc.timestamp_millis_opt(millis).unwrap(),
        }
    }

    fn order(sidebar: &Sidebar) -> Vec<String> {
        sidebar.order().into_iter().map(|id| id.0).collect()
    }

    #[test]
    fn touch_moves_partner_to_front() {
        let mut sidebar = Sidebar::new();
        sidebar.load(vec![partner("a"), partner("b"), partner("c")]);

        assert!(sidebar.touch(&UserId::from("c"), summary("hey", 10)));
        assert_eq!(order(&sidebar), vec!["c", "a", "b"]);
        assert_eq!(
            sidebar
                .get(&UserId::from("c"))
                .and_then(|e| e.last_message.as_ref())
                .map(|s| s.text.as_str()),
            Some("hey")
        );
    }

    #[test]
    fn unknown_partner_is_not_created() {
        let mut sidebar = Sidebar::new();
        sidebar.load(vec![partner("a")]);
        assert!(!sidebar.touch(&UserId::from("z"), summary("hi", 1)));
        assert_eq!(order(&sidebar), vec!["a"]);
    }

    #[test]
    fn equal_timestamps_follow_touch_order_not_time() {
        let mut sidebar = Sidebar::new();
        sidebar.load(vec![partner("a"), partner("b"), partner("c")]);

        sidebar.touch(&UserId::from("b"), summary("1", 5));
        sidebar.touch(&UserId::from("c"), summary("2", 5));
        sidebar.touch(&UserId::from("a"), summary("older clock", 1));
        assert_eq!(order(&sidebar), vec!["a", "c", "b"]);

        sidebar.clear_summary(&UserId::from("a"));
        assert_eq!(order(&sidebar), vec!["a", "c", "b"]);
        assert!(sidebar.get(&UserId::from("a")).expect("a").last_message.is_none());
    }
}
