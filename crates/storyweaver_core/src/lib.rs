pub mod domain;
pub mod ports;

pub use domain::{
    ChildProfile, CompletionEvent, EventSource, GeneratedStory, GeneratedTitle,
    NewProfile, NewStory, Objective, PhotoRef, ProfileCategory, SeriesContext, Story, StoryPatch,
    StoryPrompt, StoryShare, StoryStatus, User, UserCredentials, WordTarget,
};
pub use ports::{
    CompletionNotifier, CompletionStream, DatabaseService, PortError, PortResult,
    StoryGenerationService, TitleGenerationService,
};
