//! Caches shielding rooms from slow vendor calls

pub mod refresh;
pub mod vendor;

pub use refresh::{RefreshCache, RefreshFn};
pub use vendor::{
    new_vendor_movie_cache, new_vendor_user_cache, VendorMovieCache, VendorMovieData,
    VendorUserCache, VendorUserCaches, VendorUserData,
};
