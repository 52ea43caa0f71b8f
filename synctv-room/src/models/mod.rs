pub mod id;
pub mod member;
pub mod movie;
pub mod pagination;
pub mod permission;
pub mod settings;

pub use id::{generate_id, ConnectionId, MovieId, RoomId, UserId, GUEST_USER_ID};
pub use member::{CreateMemberOptions, RoomMember};
pub use movie::{BaseMovie, Movie, VendorInfo};
pub use pagination::{Page, PageParams};
pub use permission::{AdminPermissions, MemberStatus, Permissions, Role};
pub use settings::RoomSettings;
