use crate::{bk_assert, PKTaskIdx};

//

/*
A list is circular through an implicit sentinel: a link of `None` points to
the sentinel, whose key is the maximum value and therefore sorts last.

    sentinel -> head -> ... -> tail -> sentinel

The roaming cursor is `None` while it rests on the sentinel.
*/

/// Which of the two items of a task a list links.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum PKItemKind
{
    State,
    Event
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum PKListId
{
    Ready(u8),
    Delayed(u8),
    PendingReady,
    Suspended,
    Terminated,
    Event(u8)
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct PKItem
{
    pub(crate) value: u32,
    next: Option<PKTaskIdx>,
    prev: Option<PKTaskIdx>,
    container: Option<PKListId>
}

impl PKItem
{
    pub(crate) const fn new() -> PKItem
    {
        PKItem {
            value: 0,
            next: None,
            prev: None,
            container: None
        }
    }

    pub(crate) fn container(&self) -> Option<PKListId>
    {
        self.container
    }
}

/// Storage that owns the items linked by lists.
pub(crate) trait PKItemOwner
{
    fn item(&self, idx: PKTaskIdx, kind: PKItemKind) -> &PKItem;
    fn item_mut(&mut self, idx: PKTaskIdx, kind: PKItemKind) -> &mut PKItem;
}

//

pub(crate) struct PKList
{
    id: PKListId,
    kind: PKItemKind,
    head: Option<PKTaskIdx>,
    tail: Option<PKTaskIdx>,
    cursor: Option<PKTaskIdx>,
    len: usize
}

impl PKList
{
    pub(crate) const fn new(id: PKListId, kind: PKItemKind) -> PKList
    {
        PKList {
            id,
            kind,
            head: None,
            tail: None,
            cursor: None,
            len: 0
        }
    }

    pub(crate) fn id(&self) -> PKListId
    {
        self.id
    }

    pub(crate) fn len(&self) -> usize
    {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    pub(crate) fn head(&self) -> Option<PKTaskIdx>
    {
        self.head
    }

    pub(crate) fn head_value<O: PKItemOwner>(&self, owner: &O) -> Option<u32>
    {
        self.head.map(|h| owner.item(h, self.kind).value)
    }

    pub(crate) fn contains<O: PKItemOwner>(&self, owner: &O, idx: PKTaskIdx) -> bool
    {
        owner.item(idx, self.kind).container == Some(self.id)
    }

    /// Inserts after every item whose key is not greater, so equal keys stay FIFO.
    pub(crate) fn insert_sorted<O: PKItemOwner>(&mut self, owner: &mut O, idx: PKTaskIdx)
    {
        let value = owner.item(idx, self.kind).value;

        if value == u32::MAX {
            self.insert_tail(owner, idx);
            return;
        }

        let mut before = self.head;

        while let Some(b) = before {
            let it = owner.item(b, self.kind);
            if it.value > value {
                break;
            }
            before = it.next;
        }

        self.link_before(owner, idx, before);
    }

    /// Appends just before the sentinel, ignoring the key.
    pub(crate) fn insert_tail<O: PKItemOwner>(&mut self, owner: &mut O, idx: PKTaskIdx)
    {
        self.link_before(owner, idx, None);
    }

    /// Unlinks `idx` and returns the number of items left.
    pub(crate) fn remove<O: PKItemOwner>(&mut self, owner: &mut O, idx: PKTaskIdx) -> usize
    {
        let it = owner.item_mut(idx, self.kind);
        bk_assert!(it.container == Some(self.id), "item {} not in {:?}", idx, self.id);

        let (prev, next) = (it.prev, it.next);
        it.prev = None;
        it.next = None;
        it.container = None;

        match prev {
            Some(p) => owner.item_mut(p, self.kind).next = next,
            None => self.head = next
        }
        match next {
            Some(n) => owner.item_mut(n, self.kind).prev = prev,
            None => self.tail = prev
        }

        if self.cursor == Some(idx) {
            self.cursor = prev;
        }

        self.len -= 1;
        self.len
    }

    /// Advances the roaming cursor past the sentinel and returns the owner it lands on.
    pub(crate) fn next_owner<O: PKItemOwner>(&mut self, owner: &O) -> Option<PKTaskIdx>
    {
        let next = match self.cursor {
            Some(c) => owner.item(c, self.kind).next,
            None => self.head
        };

        self.cursor = next.or(self.head);
        self.cursor
    }

    pub(crate) fn iter<'o, O: PKItemOwner>(&self, owner: &'o O) -> PKListIter<'o, O>
    {
        PKListIter {
            owner,
            kind: self.kind,
            at: self.head
        }
    }

    fn link_before<O: PKItemOwner>(&mut self, owner: &mut O, idx: PKTaskIdx, before: Option<PKTaskIdx>)
    {
        let prev = match before {
            Some(b) => owner.item(b, self.kind).prev,
            None => self.tail
        };

        let it = owner.item_mut(idx, self.kind);
        bk_assert!(it.container.is_none(), "item {} already in {:?}", idx, it.container);

        it.prev = prev;
        it.next = before;
        it.container = Some(self.id);

        match prev {
            Some(p) => owner.item_mut(p, self.kind).next = Some(idx),
            None => self.head = Some(idx)
        }
        match before {
            Some(b) => owner.item_mut(b, self.kind).prev = Some(idx),
            None => self.tail = Some(idx)
        }

        self.len += 1;
    }
}

pub(crate) struct PKListIter<'o, O>
{
    owner: &'o O,
    kind: PKItemKind,
    at: Option<PKTaskIdx>
}

impl<O: PKItemOwner> Iterator for PKListIter<'_, O>
{
    type Item = PKTaskIdx;

    fn next(&mut self) -> Option<PKTaskIdx>
    {
        let idx = self.at?;
        self.at = self.owner.item(idx, self.kind).next;
        Some(idx)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    struct Items(Vec<[PKItem; 2]>);

    impl Items
    {
        fn new(n: usize) -> Items
        {
            Items(vec![[PKItem::new(); 2]; n])
        }

        fn keyed(keys: &[u32]) -> Items
        {
            let mut items = Items::new(keys.len());
            for (i, k) in keys.iter().enumerate() {
                items.0[i][0].value = *k;
            }
            items
        }
    }

    impl PKItemOwner for Items
    {
        fn item(&self, idx: PKTaskIdx, kind: PKItemKind) -> &PKItem
        {
            &self.0[idx as usize][kind as usize]
        }

        fn item_mut(&mut self, idx: PKTaskIdx, kind: PKItemKind) -> &mut PKItem
        {
            &mut self.0[idx as usize][kind as usize]
        }
    }

    fn order(list: &PKList, items: &Items) -> Vec<PKTaskIdx>
    {
        list.iter(items).collect()
    }

    #[test]
    fn test_sorted_ties_fifo()
    {
        let mut items = Items::keyed(&[5, 3, 5, 1, 5, u32::MAX, 3]);
        let mut list = PKList::new(PKListId::Delayed(0), PKItemKind::State);

        for i in 0..7 {
            list.insert_sorted(&mut items, i);
        }

        assert_eq!(order(&list, &items), vec![3, 1, 6, 0, 2, 4, 5]);
        assert_eq!(list.head_value(&items), Some(1));
        assert_eq!(list.len(), 7);
    }

    #[test]
    fn test_max_key_goes_last()
    {
        let mut items = Items::keyed(&[u32::MAX, 7, u32::MAX]);
        let mut list = PKList::new(PKListId::Delayed(1), PKItemKind::State);

        list.insert_sorted(&mut items, 0);
        list.insert_sorted(&mut items, 1);
        list.insert_sorted(&mut items, 2);

        assert_eq!(order(&list, &items), vec![1, 0, 2]);
    }

    #[test]
    fn test_insert_tail_ignores_key()
    {
        let mut items = Items::keyed(&[9, 1, 4]);
        let mut list = PKList::new(PKListId::Ready(2), PKItemKind::State);

        for i in 0..3 {
            list.insert_tail(&mut items, i);
        }

        assert_eq!(order(&list, &items), vec![0, 1, 2]);
        assert!(list.contains(&items, 1));
    }

    #[test]
    fn test_remove_returns_len()
    {
        let mut items = Items::new(3);
        let mut list = PKList::new(PKListId::Suspended, PKItemKind::State);

        for i in 0..3 {
            list.insert_tail(&mut items, i);
        }

        assert_eq!(list.remove(&mut items, 1), 2);
        assert_eq!(order(&list, &items), vec![0, 2]);
        assert_eq!(list.remove(&mut items, 0), 1);
        assert_eq!(list.remove(&mut items, 2), 0);
        assert!(list.is_empty());
        assert_eq!(list.head(), None);
        assert_eq!(items.item(1, PKItemKind::State).container(), None);
    }

    #[test]
    fn test_cursor_round_robin()
    {
        let mut items = Items::new(3);
        let mut list = PKList::new(PKListId::Ready(1), PKItemKind::State);

        for i in 0..3 {
            list.insert_tail(&mut items, i);
        }

        let seq: Vec<_> = (0..7).map(|_| list.next_owner(&items).unwrap()).collect();
        assert_eq!(seq, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_cursor_rewinds_on_remove()
    {
        let mut items = Items::new(3);
        let mut list = PKList::new(PKListId::Ready(1), PKItemKind::State);

        for i in 0..3 {
            list.insert_tail(&mut items, i);
        }

        assert_eq!(list.next_owner(&items), Some(0));
        assert_eq!(list.next_owner(&items), Some(1));

        list.remove(&mut items, 1);
        assert_eq!(list.next_owner(&items), Some(2));

        list.remove(&mut items, 0);
        list.remove(&mut items, 2);
        assert_eq!(list.next_owner(&items), None);
    }

    #[test]
    fn test_kinds_are_independent()
    {
        let mut items = Items::new(2);
        let mut state = PKList::new(PKListId::Delayed(0), PKItemKind::State);
        let mut event = PKList::new(PKListId::Event(0), PKItemKind::Event);

        state.insert_tail(&mut items, 0);
        event.insert_tail(&mut items, 0);
        event.insert_tail(&mut items, 1);

        assert_eq!(event.remove(&mut items, 0), 1);
        assert!(state.contains(&items, 0));
        assert!(!event.contains(&items, 0));
    }

    #[test]
    #[should_panic]
    fn test_double_insert()
    {
        let mut items = Items::new(1);
        let mut a = PKList::new(PKListId::Ready(0), PKItemKind::State);
        let mut b = PKList::new(PKListId::Suspended, PKItemKind::State);

        a.insert_tail(&mut items, 0);
        b.insert_tail(&mut items, 0);
    }
}
