//! Profile settings: the editable form and the mutations behind it.

use std::sync::Arc;

use crate::backend::Backend;
use crate::error::MutationError;
use crate::hooks::{use_current_user, use_user, USERS};
use crate::notify::{EventBus, Notification, PROFILE_UPDATED};
use crate::query::{Mutation, QueryClient, QueryFilter};
use crate::types::{ProfilePatch, User};

/// Where the caller should go after deleting the account.
pub const REGISTER_ROUTE: &str = "/register";

/// Editable copy of the profile. Filled once from the cached user and then
/// owned by the caller; edits never touch the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileForm {
  pub username: String,
  pub bio: String,
  pub image: String,
  pub handle: String,
}

impl From<&User> for ProfileForm {
  fn from(user: &User) -> Self {
    Self {
      username: user.name.clone().unwrap_or_default(),
      bio: user.bio.clone().unwrap_or_default(),
      image: user.image.clone().unwrap_or_default(),
      handle: user.handle.clone().unwrap_or_default(),
    }
  }
}

impl ProfileForm {
  pub fn to_patch(&self) -> ProfilePatch {
    ProfilePatch {
      bio: self.bio.clone(),
      username: self.username.clone(),
      image: self.image.clone(),
      handle: self.handle.clone(),
    }
  }
}

pub struct Settings {
  client: QueryClient,
  backend: Arc<dyn Backend>,
  edit: Mutation<ProfilePatch, User>,
  delete: Mutation<(), ()>,
}

impl Settings {
  pub fn new(client: &QueryClient, backend: Arc<dyn Backend>, bus: Arc<dyn EventBus>) -> Self {
    let edit_backend = Arc::clone(&backend);
    let edit = Mutation::new(client, move |patch: ProfilePatch| {
      let backend = Arc::clone(&edit_backend);
      async move { backend.edit_profile(&patch).await }
    })
    .invalidates(QueryFilter::namespace(USERS))
    .success_message("Changes applied")
    .on_success(move |_| bus.publish(PROFILE_UPDATED));

    let delete_backend = Arc::clone(&backend);
    let delete = Mutation::new(client, move |_: ()| {
      let backend = Arc::clone(&delete_backend);
      async move { backend.delete_account().await }
    })
    .invalidates(QueryFilter::namespace(USERS))
    .success_message("Account deleted. See you later!")
    .error_message("Could not delete your account");

    Self {
      client: client.clone(),
      backend,
      edit,
      delete,
    }
  }

  /// Load the signed-in user's profile into a fresh form.
  ///
  /// `None` when the current user or their profile could not be loaded; the
  /// failure has already been notified by the cache.
  pub async fn load(&self) -> Option<ProfileForm> {
    let current = use_current_user(&self.client, &self.backend).fetch().await;
    let handle = current.data().and_then(|c| c.user.handle.clone());

    let user = use_user(&self.client, &self.backend, handle.as_deref())
      .fetch()
      .await;
    user.data().map(ProfileForm::from)
  }

  /// Save the form.
  pub async fn save(&self, form: &ProfileForm) -> Result<User, MutationError> {
    self.edit.mutate(form.to_patch()).await
  }

  /// Clear the profile picture. Does nothing (besides telling the user) when
  /// there is no picture.
  pub async fn remove_picture(&self, form: &ProfileForm) -> Result<Option<User>, MutationError> {
    if form.image.is_empty() {
      self
        .client
        .notifier()
        .notify(Notification::error("There is nothing to delete"));
      return Ok(None);
    }

    let form = ProfileForm {
      image: String::new(),
      ..form.clone()
    };
    self.save(&form).await.map(Some)
  }

  /// Delete the account, drop everything cached for it and send the caller
  /// to the registration page.
  pub async fn delete_account(&self) -> Result<&'static str, MutationError> {
    self.delete.mutate(()).await?;
    self.client.clear();
    Ok(REGISTER_ROUTE)
  }
}
