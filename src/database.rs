use crate::model::*;
use sled::transaction::{TransactionError, Transactional};

fn serialize_id(id: u64) -> [u8; 8] {
    id.to_le_bytes()
}

fn deserialize_id<V: AsRef<[u8]>>(id: V) -> u64 {
    use std::convert::TryInto;
    u64::from_le_bytes(id.as_ref().try_into().unwrap())
}

/// Index key for the per-title review listing: media prefix followed by the
/// big-endian review id, so a prefix scan yields reviews in insertion order.
fn review_index_key(media: MediaRef, review_id: u64) -> Vec<u8> {
    let mut key = media_prefix(media).to_vec();
    key.extend_from_slice(&review_id.to_be_bytes());
    key
}

fn media_prefix(media: MediaRef) -> [u8; 9] {
    let mut prefix = [0u8; 9];
    prefix[0..8].copy_from_slice(&media.tmdb_id.to_le_bytes());
    prefix[8] = media.media_type.tag();
    prefix
}

const USERS: &[u8] = b"users";
const USERS_USERNAME: &[u8] = b"users_username";
const USERS_EMAIL: &[u8] = b"users_email";
const REVIEWS: &[u8] = b"reviews";
const REVIEWS_MEDIA: &[u8] = b"reviews_media";
const WATCHLISTS: &[u8] = b"watchlists";

pub trait UserDb {
    type Error;
    /// Returns `None` when the username or email is already taken.
    fn add_user(&self, user: &User) -> Result<Option<u64>, Self::Error>;
    fn get_user(&self, id: u64) -> Result<Option<User>, Self::Error>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<(u64, User)>, Self::Error>;
}

impl UserDb for sled::Db {
    type Error = sled::Error;

    fn add_user(&self, user: &User) -> sled::Result<Option<u64>> {
        let users = self.open_tree(USERS)?;
        let users_username = self.open_tree(USERS_USERNAME)?;
        let users_email = self.open_tree(USERS_EMAIL)?;
        let id = self.generate_id()?;
        if let Err(err) = (&users, &users_username, &users_email).transaction(
            |(users, users_username, users_email)| {
                users.insert(&serialize_id(id), bincode::serialize(user).unwrap())?;
                if users_username
                    .insert(user.username.as_bytes(), &serialize_id(id))?
                    .is_some()
                {
                    sled::transaction::abort(())?;
                }
                if users_email
                    .insert(user.email.as_bytes(), &serialize_id(id))?
                    .is_some()
                {
                    sled::transaction::abort(())?;
                }
                Ok(())
            },
        ) {
            match err {
                TransactionError::Storage(e) => return Err(e),
                TransactionError::Abort(_) => return Ok(None),
            };
        }
        Ok(Some(id))
    }

    fn get_user(&self, id: u64) -> sled::Result<Option<User>> {
        let users = self.open_tree(USERS)?;
        Ok(users
            .get(serialize_id(id))?
            .map(|d| bincode::deserialize(&d).unwrap()))
    }

    fn get_user_by_email(&self, email: &str) -> sled::Result<Option<(u64, User)>> {
        let users_email = self.open_tree(USERS_EMAIL)?;
        let users = self.open_tree(USERS)?;
        if let Some(id) = users_email.get(email)? {
            let user =
                bincode::deserialize(&users.get(&id)?.expect("Bad index users_email")).unwrap();
            Ok(Some((deserialize_id(id), user)))
        } else {
            Ok(None)
        }
    }
}

pub trait ReviewDb {
    type Error;
    /// Append-only; assigns and returns the new review id. The handler
    /// validates first, but bounds are re-checked here as the final
    /// authority before anything is written.
    fn add_review(&self, review: &Review) -> Result<u64, Self::Error>;
    /// Reviews for one title, newest first.
    fn reviews_for(&self, media: MediaRef) -> Result<Vec<(u64, Review)>, Self::Error>;
    /// Atomically increments the persisted helpful count.
    fn mark_helpful(&self, review_id: u64) -> Result<Option<Review>, Self::Error>;
}

pub const RATING_MIN: u8 = 1;
pub const RATING_MAX: u8 = 5;
pub const REVIEW_TEXT_MIN: usize = 10;
pub const REVIEW_TEXT_MAX: usize = 1000;

impl ReviewDb for sled::Db {
    type Error = sled::Error;

    fn add_review(&self, review: &Review) -> sled::Result<u64> {
        if review.rating < RATING_MIN || review.rating > RATING_MAX {
            return Err(sled::Error::Unsupported(
                "rating out of range".to_owned(),
            ));
        }
        let text_len = review.text.chars().count();
        if text_len < REVIEW_TEXT_MIN || text_len > REVIEW_TEXT_MAX {
            return Err(sled::Error::Unsupported(
                "review text length out of range".to_owned(),
            ));
        }
        let reviews = self.open_tree(REVIEWS)?;
        let index = self.open_tree(REVIEWS_MEDIA)?;
        let id = self.generate_id()?;
        let media = MediaRef {
            tmdb_id: review.tmdb_id,
            media_type: review.media_type,
        };
        (&reviews, &index)
            .transaction(|(reviews, index)| {
                reviews.insert(&serialize_id(id), bincode::serialize(review).unwrap())?;
                index.insert(review_index_key(media, id), sled::IVec::default())?;
                Ok(())
            })
            .map_err(|e: TransactionError<()>| match e {
                TransactionError::Storage(s) => s,
                _ => unreachable!(),
            })?;
        Ok(id)
    }

    fn reviews_for(&self, media: MediaRef) -> sled::Result<Vec<(u64, Review)>> {
        use std::convert::TryFrom;
        let reviews = self.open_tree(REVIEWS)?;
        let index = self.open_tree(REVIEWS_MEDIA)?;
        let mut out = Vec::new();
        for entry in index.scan_prefix(media_prefix(media)) {
            let (key, _) = entry?;
            let id = u64::from_be_bytes(TryFrom::try_from(&key[9..17]).unwrap());
            if let Some(data) = reviews.get(serialize_id(id))? {
                out.push((id, bincode::deserialize(&data).unwrap()));
            }
        }
        // The index scan yields insertion order; newest first for callers.
        out.reverse();
        Ok(out)
    }

    fn mark_helpful(&self, review_id: u64) -> sled::Result<Option<Review>> {
        let reviews = self.open_tree(REVIEWS)?;
        let updated = reviews.update_and_fetch(serialize_id(review_id), |old| {
            old.map(|data| {
                let mut review: Review = bincode::deserialize(data).unwrap();
                review.helpful_count += 1;
                bincode::serialize(&review).unwrap()
            })
        })?;
        Ok(updated.map(|data| bincode::deserialize(&data).unwrap()))
    }
}

pub trait WatchlistDb {
    type Error;
    fn get_watchlist(&self, user_id: u64) -> Result<Vec<WatchlistItem>, Self::Error>;
    /// Applies a validated mutation inside a single-document transaction.
    /// Adding a pair already present and removing a pair not present are
    /// both no-ops, so repeated identical calls converge on the same state.
    fn apply_mutation(&self, user_id: u64, mutation: &WatchlistMutation)
        -> Result<(), Self::Error>;
}

impl WatchlistDb for sled::Db {
    type Error = sled::Error;

    fn get_watchlist(&self, user_id: u64) -> sled::Result<Vec<WatchlistItem>> {
        let watchlists = self.open_tree(WATCHLISTS)?;
        Ok(watchlists
            .get(serialize_id(user_id))?
            .map(|d| bincode::deserialize(&d).unwrap())
            .unwrap_or_default())
    }

    fn apply_mutation(
        &self,
        user_id: u64,
        mutation: &WatchlistMutation,
    ) -> sled::Result<()> {
        let watchlists = self.open_tree(WATCHLISTS)?;
        watchlists
            .transaction(|watchlists| {
                let mut items: Vec<WatchlistItem> = watchlists
                    .get(&serialize_id(user_id))?
                    .map(|d| bincode::deserialize(&d).unwrap())
                    .unwrap_or_default();
                match mutation {
                    WatchlistMutation::Add(item) => {
                        if !items.iter().any(|m| m.matches(mutation.media())) {
                            items.push(item.clone());
                        }
                    }
                    WatchlistMutation::Remove(media) => {
                        items.retain(|m| !m.matches(*media));
                    }
                }
                watchlists.insert(&serialize_id(user_id), bincode::serialize(&items).unwrap())?;
                Ok(())
            })
            .map_err(|e: TransactionError<()>| match e {
                TransactionError::Storage(s) => s,
                _ => unreachable!(),
            })
    }
}
