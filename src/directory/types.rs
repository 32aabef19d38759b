use serde::{Deserialize, Serialize};

// ── Wire shapes (remote API) ─────────────────────────────────────

/// `{ret, msg, data}` wrapper every remote call answers with.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub ret: i64,
    #[serde(default)]
    pub msg: Option<String>,
    pub data: Option<T>,
}

/// Result of the contact listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContactIds {
    #[serde(default, rename = "friends")]
    pub friend_ids: Vec<String>,
    #[serde(default, rename = "chatrooms")]
    pub group_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendDetail {
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub nick_name: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDetail {
    #[serde(default)]
    pub wxid: String,
    #[serde(default)]
    pub nick_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetail {
    #[serde(default)]
    pub chatroom_id: String,
    #[serde(default)]
    pub nick_name: Option<String>,
    #[serde(default)]
    pub member_list: Vec<MemberDetail>,
}

// ── Snapshot records ─────────────────────────────────────────────

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Remark wins over the platform nickname; blank values count as absent.
pub fn resolve_display_name(remark: Option<&str>, nick_name: Option<&str>) -> Option<String> {
    non_empty(remark)
        .or_else(|| non_empty(nick_name))
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

impl ContactRecord {
    /// `None` for placeholder/disabled accounts: no id or no usable name.
    pub fn from_detail(detail: FriendDetail) -> Option<Self> {
        let id = detail.user_name.trim();
        if id.is_empty() {
            return None;
        }
        let display_name =
            resolve_display_name(detail.remark.as_deref(), detail.nick_name.as_deref())?;
        Some(Self {
            id: id.to_string(),
            display_name,
            nick_name: detail.nick_name,
            remark: detail.remark.filter(|r| !r.trim().is_empty()),
        })
    }

    /// Whether `name` refers to this contact by display name, nickname or remark.
    pub fn answers_to(&self, name: &str) -> bool {
        self.display_name == name
            || self.nick_name.as_deref() == Some(name)
            || self.remark.as_deref() == Some(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub member_list: Vec<GroupMember>,
}

impl GroupRecord {
    pub fn from_detail(detail: GroupDetail) -> Option<Self> {
        let id = detail.chatroom_id.trim();
        let name = non_empty(detail.nick_name.as_deref())?;
        if id.is_empty() {
            return None;
        }
        let member_list = detail
            .member_list
            .into_iter()
            .filter(|m| !m.wxid.is_empty())
            .map(|m| GroupMember {
                display_name: resolve_display_name(
                    m.display_name.as_deref(),
                    m.nick_name.as_deref(),
                )
                .unwrap_or_else(|| m.wxid.clone()),
                id: m.wxid,
            })
            .collect();
        Some(Self {
            id: id.to_string(),
            name: name.to_string(),
            member_list,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn friend(id: &str, nick: Option<&str>, remark: Option<&str>) -> FriendDetail {
        FriendDetail {
            user_name: id.into(),
            nick_name: nick.map(Into::into),
            remark: remark.map(Into::into),
        }
    }

    #[test]
    fn remark_takes_precedence_over_nickname() {
        let rec = ContactRecord::from_detail(friend("wxid_1", Some("bob1234"), Some("Bob"))).unwrap();
        assert_eq!(rec.display_name, "Bob");

        let rec = ContactRecord::from_detail(friend("wxid_1", Some("bob1234"), None)).unwrap();
        assert_eq!(rec.display_name, "bob1234");
    }

    #[test]
    fn blank_remark_falls_back_to_nickname() {
        let rec = ContactRecord::from_detail(friend("wxid_1", Some("bob1234"), Some("  "))).unwrap();
        assert_eq!(rec.display_name, "bob1234");
        assert!(rec.remark.is_none());
    }

    #[test]
    fn records_without_usable_name_or_id_are_dropped() {
        assert!(ContactRecord::from_detail(friend("wxid_1", None, None)).is_none());
        assert!(ContactRecord::from_detail(friend("wxid_1", Some(""), Some(""))).is_none());
        assert!(ContactRecord::from_detail(friend("", Some("nick"), None)).is_none());
    }

    #[test]
    fn contact_answers_to_any_known_name() {
        let rec = ContactRecord::from_detail(friend("wxid_1", Some("bob1234"), Some("Bob"))).unwrap();
        assert!(rec.answers_to("Bob"));
        assert!(rec.answers_to("bob1234"));
        assert!(!rec.answers_to("wxid_1"));
    }

    #[test]
    fn group_members_resolve_display_names() {
        let detail: GroupDetail = serde_json::from_value(serde_json::json!({
            "chatroomId": "123@chatroom",
            "nickName": "Weekend Hikers",
            "memberList": [
                {"wxid": "wxid_a", "nickName": "alice", "displayName": "Alice (admin)"},
                {"wxid": "wxid_b", "nickName": "bob"},
                {"wxid": "wxid_c"},
                {"nickName": "ghost"}
            ]
        }))
        .unwrap();

        let rec = GroupRecord::from_detail(detail).unwrap();
        assert_eq!(rec.name, "Weekend Hikers");
        let names: Vec<_> = rec.member_list.iter().map(|m| m.display_name.as_str()).collect();
        assert_eq!(names, vec!["Alice (admin)", "bob", "wxid_c"]);
    }

    #[test]
    fn unnamed_group_is_dropped() {
        let detail = GroupDetail {
            chatroom_id: "1@chatroom".into(),
            nick_name: None,
            member_list: vec![],
        };
        assert!(GroupRecord::from_detail(detail).is_none());
    }

    #[test]
    fn contact_ids_decode_from_listing_payload() {
        let env: ApiEnvelope<ContactIds> = serde_json::from_value(serde_json::json!({
            "ret": 200,
            "msg": "ok",
            "data": {"friends": ["a", "b"], "chatrooms": ["g@chatroom"], "ghs": ["gh_1"]}
        }))
        .unwrap();
        let ids = env.data.unwrap();
        assert_eq!(ids.friend_ids, vec!["a", "b"]);
        assert_eq!(ids.group_ids, vec!["g@chatroom"]);
    }

    #[test]
    fn snapshot_record_serializes_camel_case() {
        let rec = ContactRecord::from_detail(friend("wxid_1", Some("bob1234"), Some("Bob"))).unwrap();
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["displayName"], "Bob");
        assert_eq!(json["nickName"], "bob1234");
        assert_eq!(json["id"], "wxid_1");
    }
}
