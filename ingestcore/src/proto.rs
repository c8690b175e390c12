//! Wire structs for group contexts persisted alongside group-update rows.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupMember {
    #[prost(string, optional, tag = "1")]
    pub uuid: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "2")]
    pub e164: ::core::option::Option<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupContext {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub id: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
    /// 0 unknown, 1 update, 2 deliver, 3 quit, 4 request info
    #[prost(int32, optional, tag = "2")]
    pub r#type: ::core::option::Option<i32>,
    #[prost(string, optional, tag = "3")]
    pub name: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(message, repeated, tag = "6")]
    pub members: ::prost::alloc::vec::Vec<GroupMember>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GroupContextV2 {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub master_key: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
    #[prost(uint32, optional, tag = "2")]
    pub revision: ::core::option::Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecryptedGroup {
    #[prost(string, tag = "2")]
    pub title: ::prost::alloc::string::String,
    #[prost(uint32, tag = "6")]
    pub revision: u32,
    #[prost(message, repeated, tag = "7")]
    pub members: ::prost::alloc::vec::Vec<GroupMember>,
    #[prost(message, repeated, tag = "8")]
    pub pending_members: ::prost::alloc::vec::Vec<GroupMember>,
    #[prost(uint32, tag = "12")]
    pub disappearing_timer_seconds: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecryptedGroupChange {
    #[prost(message, optional, tag = "1")]
    pub editor: ::core::option::Option<GroupMember>,
    #[prost(uint32, tag = "2")]
    pub revision: u32,
    #[prost(message, repeated, tag = "3")]
    pub new_members: ::prost::alloc::vec::Vec<GroupMember>,
    #[prost(message, repeated, tag = "4")]
    pub deleted_members: ::prost::alloc::vec::Vec<GroupMember>,
    #[prost(message, repeated, tag = "8")]
    pub new_pending_members: ::prost::alloc::vec::Vec<GroupMember>,
    #[prost(message, repeated, tag = "9")]
    pub deleted_pending_members: ::prost::alloc::vec::Vec<GroupMember>,
    #[prost(message, repeated, tag = "10")]
    pub promote_pending_members: ::prost::alloc::vec::Vec<GroupMember>,
    #[prost(string, optional, tag = "11")]
    pub new_title: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(uint32, optional, tag = "13")]
    pub new_timer_seconds: ::core::option::Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DecryptedGroupV2Context {
    #[prost(message, optional, tag = "1")]
    pub context: ::core::option::Option<GroupContextV2>,
    #[prost(message, optional, tag = "2")]
    pub change: ::core::option::Option<DecryptedGroupChange>,
    #[prost(message, optional, tag = "3")]
    pub group_state: ::core::option::Option<DecryptedGroup>,
}
